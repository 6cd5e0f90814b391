use rama::telemetry::tracing;

pub use libc::rlim_t;

/// Raise the soft limit of open file descriptors up to `target`
/// (capped by the hard limit).
///
/// The generator keeps one socket per pooled connection.
pub fn raise_nofile(target: rlim_t) -> std::io::Result<()> {
    // SAFETY: rlimit is a plain C struct, zeroed is a valid value,
    // and both calls only read/write the struct we own.
    let mut lim: libc::rlimit = unsafe { std::mem::zeroed() };
    if unsafe { libc::getrlimit(libc::RLIMIT_NOFILE, &mut lim) } != 0 {
        return Err(std::io::Error::last_os_error());
    }

    let new_soft = target.min(lim.rlim_max);
    let current = lim.rlim_cur;

    if current >= new_soft {
        tracing::info!(
            current,
            requested = new_soft,
            "ulimit: current nofile limit is sufficient"
        );
        return Ok(());
    }

    lim.rlim_cur = new_soft;
    if unsafe { libc::setrlimit(libc::RLIMIT_NOFILE, &lim) } != 0 {
        return Err(std::io::Error::last_os_error());
    }

    tracing::info!(previous = current, new_soft, "ulimit: raised nofile soft limit");
    Ok(())
}
