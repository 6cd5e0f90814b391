use std::{fmt, str::FromStr};

use rama::{http::Uri, utils::str::arcstr::ArcStr};
use rand::RngExt;
use serde::{Deserialize, Serialize};

use crate::routing::{CircuitState, MAX_WEIGHT, RoutingInput, WeightTable};

/// Id used for the single member of a pool created from one target url.
pub const DEFAULT_TARGET_ID: &str = "target";

/// A pool member as configured on the command line: `id=url[,weight]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendSpec {
    pub id: ArcStr,
    pub url: Uri,
    pub weight: u32,
}

#[derive(Debug, Clone)]
pub struct ParseBackendSpecError(String);

impl fmt::Display for ParseBackendSpecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid backend (expected id=url[,weight]): {}", self.0)
    }
}

impl std::error::Error for ParseBackendSpecError {}

impl FromStr for BackendSpec {
    type Err = ParseBackendSpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (id, rest) = s
            .split_once('=')
            .ok_or_else(|| ParseBackendSpecError(format!("missing '=' in {s:?}")))?;
        let id = id.trim();
        if id.is_empty() {
            return Err(ParseBackendSpecError(format!("empty id in {s:?}")));
        }

        let (url, weight) = match rest.rsplit_once(',') {
            Some((url, weight)) => {
                let weight: u32 = weight.trim().parse().map_err(|err| {
                    ParseBackendSpecError(format!("weight {weight:?} of {id}: {err}"))
                })?;
                (url, weight)
            }
            None => (rest, MAX_WEIGHT),
        };

        let url: Uri = url
            .trim()
            .parse()
            .map_err(|err| ParseBackendSpecError(format!("url {url:?} of {id}: {err}")))?;
        check_target_url(&url).map_err(ParseBackendSpecError)?;

        Ok(Self {
            id: ArcStr::from(id),
            url,
            weight: weight.min(MAX_WEIGHT),
        })
    }
}

/// Targets must be absolute http(s) urls.
pub fn check_target_url(url: &Uri) -> Result<(), String> {
    match url.scheme_str() {
        Some("http" | "https") => (),
        _ => return Err(format!("url {url} must use the http or https scheme")),
    }
    if url.authority().is_none() {
        return Err(format!("url {url} has no host"));
    }
    Ok(())
}

#[derive(Debug, Clone)]
pub enum PoolError {
    Empty,
    DuplicateId(ArcStr),
    InvalidUrl(String),
}

impl fmt::Display for PoolError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PoolError::Empty => write!(f, "target pool requires at least one backend"),
            PoolError::DuplicateId(id) => write!(f, "duplicate backend id in target pool: {id}"),
            PoolError::InvalidUrl(err) => write!(f, "invalid target: {err}"),
        }
    }
}

impl std::error::Error for PoolError {}

#[derive(Debug, Clone)]
pub struct UnknownBackendError(pub ArcStr);

impl fmt::Display for UnknownBackendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown backend: {}", self.0)
    }
}

impl std::error::Error for UnknownBackendError {}

#[derive(Debug, Clone)]
pub struct PoolMember {
    id: ArcStr,
    url: Uri,
    // url without trailing slash, request paths are appended to it
    base: ArcStr,
    routing: RoutingInput,
}

impl PoolMember {
    pub fn id(&self) -> &ArcStr {
        &self.id
    }

    /// Absolute url for `path` (starting with a `/`) on this member.
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{path}", self.base)
    }

    pub fn view(&self) -> BackendView {
        BackendView {
            id: self.id.clone(),
            url: self.url.to_string(),
            weight: self.routing.weight(),
            circuit_state: self.routing.circuit_state(),
            ramp_up_pct: self.routing.ramp_up_pct(),
            effective_weight: self.routing.effective_weight(),
        }
    }
}

/// Pool member as reported over the control api.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendView {
    pub id: ArcStr,
    pub url: String,
    pub weight: u32,
    pub circuit_state: CircuitState,
    pub ramp_up_pct: f64,
    pub effective_weight: f64,
}

/// Live change to the routing input of one pool member.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendUpdate {
    pub id: String,
    pub weight: Option<u32>,
    pub circuit_state: Option<CircuitState>,
    pub ramp_up_pct: Option<f64>,
}

/// Immutable weighted set of targets.
///
/// Changes produce a new pool, see [`TargetPool::with_update`].
#[derive(Debug, Clone)]
pub struct TargetPool {
    // sorted by id, so member index order is id order
    members: Vec<PoolMember>,
    table: WeightTable<usize>,
}

impl TargetPool {
    pub fn try_new(specs: impl IntoIterator<Item = BackendSpec>) -> Result<Self, PoolError> {
        let mut members: Vec<_> = specs
            .into_iter()
            .map(|spec| {
                let base = ArcStr::from(spec.url.to_string().trim_end_matches('/'));
                PoolMember {
                    id: spec.id,
                    url: spec.url,
                    base,
                    routing: RoutingInput::new(spec.weight),
                }
            })
            .collect();
        if members.is_empty() {
            return Err(PoolError::Empty);
        }

        members.sort_by(|a, b| a.id.cmp(&b.id));
        if let Some(pair) = members.windows(2).find(|pair| pair[0].id == pair[1].id) {
            return Err(PoolError::DuplicateId(pair[0].id.clone()));
        }

        Ok(Self::from_members(members))
    }

    /// Pool of a single closed, fully weighted target.
    pub fn single(url: Uri) -> Result<Self, PoolError> {
        check_target_url(&url).map_err(PoolError::InvalidUrl)?;
        Self::try_new([BackendSpec {
            id: ArcStr::from(DEFAULT_TARGET_ID),
            url,
            weight: MAX_WEIGHT,
        }])
    }

    fn from_members(members: Vec<PoolMember>) -> Self {
        let table = WeightTable::new(
            members
                .iter()
                .enumerate()
                .map(|(index, member)| (index, member.routing)),
        );
        Self { members, table }
    }

    pub fn members(&self) -> &[PoolMember] {
        &self.members
    }

    pub fn views(&self) -> Vec<BackendView> {
        self.members.iter().map(PoolMember::view).collect()
    }

    /// Pick a member according to the effective-weight rule,
    /// `None` if no member is eligible.
    pub fn select(&self, rng: &mut impl RngExt) -> Option<&PoolMember> {
        self.table
            .select(rng)
            .and_then(|index| self.members.get(*index))
    }

    pub fn with_update(
        &self,
        update: &BackendUpdate,
    ) -> Result<(Self, BackendView), UnknownBackendError> {
        let mut members = self.members.clone();
        let member = members
            .iter_mut()
            .find(|member| member.id.as_str() == update.id)
            .ok_or_else(|| UnknownBackendError(ArcStr::from(update.id.as_str())))?;

        if let Some(weight) = update.weight {
            member.routing.set_weight(weight);
        }
        if let Some(state) = update.circuit_state {
            member.routing.set_circuit_state(state);
        }
        if let Some(pct) = update.ramp_up_pct {
            member.routing.set_ramp_up_pct(pct);
        }
        let view = member.view();

        Ok((Self::from_members(members), view))
    }
}
