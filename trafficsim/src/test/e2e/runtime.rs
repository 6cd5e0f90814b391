use std::{
    io::ErrorKind,
    path::PathBuf,
    sync::{Arc, OnceLock},
    time::Duration,
};

use clap::Parser;
use rama::{
    Service,
    error::BoxError,
    http::{BodyExtractExt as _, Request, Response, StatusCode, service::client::HttpClientExt as _},
    net::address::SocketAddress,
    rt::Executor,
};
use serde_json::Value;

use crate::Args;

pub(super) fn client() -> impl Service<Request, Output = Response, Error = BoxError> + Clone {
    trafficsim_lib::client::new_web_client(Executor::default(), 64).unwrap()
}

pub(super) async fn get_json(addr: SocketAddress, path: &str) -> (StatusCode, Value) {
    let resp = client()
        .get(format!("http://{addr}{path}"))
        .send()
        .await
        .unwrap();
    let status = resp.status();
    (status, resp.try_into_json().await.unwrap())
}

pub(super) async fn post_json(addr: SocketAddress, path: &str, body: &Value) -> (StatusCode, Value) {
    let resp = client()
        .post(format!("http://{addr}{path}"))
        .json(body)
        .send()
        .await
        .unwrap();
    let status = resp.status();
    (status, resp.try_into_json().await.unwrap())
}

/// Spawn a simulated backend and return its bound address.
pub(super) async fn spawn_backend(id: &str, extra_args: &[&str]) -> SocketAddress {
    let mut argv = vec!["backend", "--bind", "127.0.0.1:0", "--id", id];
    argv.extend(extra_args);
    let data_dir = spawn_trafficsim_app_with_args(&argv);
    wait_for_addr(data_dir.join(format!("backend.{id}.addr.txt"))).await
}

/// Spawn a traffic generator and return the bound address of its control api.
pub(super) async fn spawn_generator(extra_args: &[&str]) -> SocketAddress {
    let mut argv = vec!["generator", "--bind", "127.0.0.1:0"];
    argv.extend(extra_args);
    let data_dir = spawn_trafficsim_app_with_args(&argv);
    wait_for_addr(data_dir.join("generator.addr.txt")).await
}

async fn wait_for_addr(path: PathBuf) -> SocketAddress {
    let addr = tokio::time::timeout(Duration::from_secs(60), read_file_or_wait(path))
        .await
        .unwrap();
    assert!(addr.ip_addr.is_loopback());
    addr
}

async fn read_file_or_wait(path: PathBuf) -> SocketAddress {
    loop {
        match tokio::fs::read_to_string(&path).await {
            Ok(s) => match s.trim().parse() {
                Ok(addr) => return addr,
                Err(err) => {
                    eprintln!("unexpected content in addr file (content={s:?}): {err}");
                }
            },
            Err(err) if err.kind() == ErrorKind::NotFound => (),
            Err(err) => panic!("unexpected error: {err}"),
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

fn spawn_trafficsim_app_with_args(cmd_args: &[&str]) -> PathBuf {
    let data_dir = crate::test::tmp_dir::try_new("trafficsim_app_e2e").unwrap();
    eprintln!("trafficsim_app_e2e all data stored under: {data_dir:?}");

    let data_dir_str = data_dir.display().to_string();

    let mut argv: Vec<&str> = vec![
        trafficsim_lib::utils::env::project_name(),
        "--data",
        &data_dir_str,
        "--graceful",
        "0.42",
    ];
    argv.extend(cmd_args);

    let args = Args::try_parse_from(argv).unwrap();

    let wait_server_ready = Arc::new(OnceLock::new());
    let notify_server_ready = wait_server_ready.clone();

    std::thread::spawn(move || {
        let rt = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        let server_future = crate::run_with_args(std::future::pending::<()>(), args);

        notify_server_ready.set(()).expect("waiter to be notified");

        rt.block_on(server_future).expect("serve without errors");
    });

    wait_server_ready.wait();

    data_dir
}
