//! Single-flight around outbound LLM calls.
//!
//! Keyed by the request fingerprint: the first dispatch for a fingerprint
//! spawns the work, every concurrent duplicate awaits the same shared
//! future, and the insert-or-reuse step is atomic per key. After the work
//! resolves, a short completion cache answers genuine re-deliveries with the
//! same result, and a failure cooldown short-circuits retries to the same
//! error so an unhappy upstream is not amplified.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::task::AbortHandle;
use tracing::{debug, warn};

use chimera_core::config::{COOLDOWN_SECS, POST_CACHE_SECS};

use crate::backend::LlmError;
use crate::fingerprint::RequestFingerprint;

/// Shareable outcome of one coalesced request.
pub type CoalesceResult = Result<String, CoalesceError>;

/// Cloneable error so every waiter on a shared future gets its own copy.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CoalesceError {
    #[error("request timed out")]
    Timeout,

    #[error("upstream error: {message}")]
    Upstream {
        transient: bool,
        status: Option<u16>,
        message: String,
    },

    #[error("request cancelled")]
    Cancelled,

    #[error("internal failure: {0}")]
    Internal(String),
}

impl CoalesceError {
    pub fn is_transient(&self) -> bool {
        match self {
            CoalesceError::Timeout => true,
            CoalesceError::Upstream { transient, .. } => *transient,
            CoalesceError::Cancelled => false,
            CoalesceError::Internal(_) => false,
        }
    }
}

impl From<LlmError> for CoalesceError {
    fn from(e: LlmError) -> Self {
        let status = match &e {
            LlmError::Api { status, .. } => Some(*status),
            LlmError::RateLimited { .. } => Some(429),
            _ => None,
        };
        CoalesceError::Upstream {
            transient: e.is_transient(),
            status,
            message: e.to_string(),
        }
    }
}

type SharedWork = Shared<BoxFuture<'static, CoalesceResult>>;

enum Slot {
    Pending {
        fut: SharedWork,
        started: Instant,
        abort: AbortHandle,
    },
    Done {
        result: String,
        expires: Instant,
    },
    Failed {
        error: CoalesceError,
        until: Instant,
    },
}

pub struct RequestCoalescer {
    slots: Arc<DashMap<String, Slot>>,
    timeout: Duration,
    post_cache: Duration,
    cooldown: Duration,
}

impl RequestCoalescer {
    pub fn new(timeout: Duration) -> Self {
        Self::with_windows(
            timeout,
            Duration::from_secs(POST_CACHE_SECS),
            Duration::from_secs(COOLDOWN_SECS),
        )
    }

    pub fn with_windows(timeout: Duration, post_cache: Duration, cooldown: Duration) -> Self {
        Self {
            slots: Arc::new(DashMap::new()),
            timeout,
            post_cache,
            cooldown,
        }
    }

    /// Run `work` at most once per live fingerprint.
    ///
    /// Duplicates arriving while the work is in flight await the same future;
    /// duplicates inside the completion cache get the stored result;
    /// duplicates inside the error cooldown get the stored error.
    pub async fn dispatch<F>(&self, fp: &RequestFingerprint, work: F) -> CoalesceResult
    where
        F: Future<Output = CoalesceResult> + Send + 'static,
    {
        use dashmap::mapref::entry::Entry;

        let now = Instant::now();
        let fut = match self.slots.entry(fp.as_str().to_string()) {
            Entry::Occupied(mut occupied) => match occupied.get() {
                Slot::Pending { fut, .. } => {
                    debug!(fingerprint = %fp, "joining in-flight request");
                    fut.clone()
                }
                Slot::Done { result, expires } if *expires > now => {
                    debug!(fingerprint = %fp, "served from completion cache");
                    return Ok(result.clone());
                }
                Slot::Failed { error, until } if *until > now => {
                    debug!(fingerprint = %fp, "short-circuited by error cooldown");
                    return Err(error.clone());
                }
                // Expired cache or cooldown: start fresh work in place.
                _ => {
                    let (fut, abort) = self.start(fp.as_str().to_string(), work);
                    occupied.insert(Slot::Pending {
                        fut: fut.clone(),
                        started: now,
                        abort,
                    });
                    fut
                }
            },
            Entry::Vacant(vacant) => {
                let (fut, abort) = self.start(fp.as_str().to_string(), work);
                vacant.insert(Slot::Pending {
                    fut: fut.clone(),
                    started: now,
                    abort,
                });
                fut
            }
        };

        fut.await
    }

    /// Abort a pending request and drop its slot. A cancelled work records
    /// neither a cached result nor a cooldown.
    pub fn cancel(&self, fp: &RequestFingerprint) -> bool {
        let removed = self
            .slots
            .remove_if(fp.as_str(), |_, slot| matches!(slot, Slot::Pending { .. }));
        match removed {
            Some((_, Slot::Pending { abort, .. })) => {
                abort.abort();
                true
            }
            _ => false,
        }
    }

    /// Spawn the work with its hard timeout, wrap the join into a shared
    /// future, and spawn the recorder that swaps the slot once it resolves.
    fn start<F>(&self, key: String, work: F) -> (SharedWork, AbortHandle)
    where
        F: Future<Output = CoalesceResult> + Send + 'static,
    {
        let timeout = self.timeout;
        let handle = tokio::spawn(async move {
            match tokio::time::timeout(timeout, work).await {
                Ok(res) => res,
                Err(_) => Err(CoalesceError::Timeout),
            }
        });
        let abort = handle.abort_handle();

        let fut: SharedWork = async move {
            match handle.await {
                Ok(res) => res,
                Err(join) if join.is_cancelled() => Err(CoalesceError::Cancelled),
                Err(join) => Err(CoalesceError::Internal(join.to_string())),
            }
        }
        .boxed()
        .shared();

        // The recorder owns the slot transition so it happens even when every
        // caller has been cancelled mid-await.
        let slots = Arc::clone(&self.slots);
        let watched = fut.clone();
        let post_cache = self.post_cache;
        let cooldown = self.cooldown;
        tokio::spawn(async move {
            match watched.await {
                Ok(result) => {
                    slots.insert(
                        key,
                        Slot::Done {
                            result,
                            expires: Instant::now() + post_cache,
                        },
                    );
                }
                Err(CoalesceError::Cancelled) => {
                    slots.remove(&key);
                }
                Err(error) => {
                    slots.insert(
                        key,
                        Slot::Failed {
                            error,
                            until: Instant::now() + cooldown,
                        },
                    );
                }
            }
        });

        (fut, abort)
    }

    /// Evict expired cache/cooldown slots; flag pendings that outlived twice
    /// their timeout (the work task died without the recorder firing).
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let stale_after = self.timeout * 2;
        let before = self.slots.len();
        self.slots.retain(|key, slot| match slot {
            Slot::Pending { started, .. } => {
                if now.duration_since(*started) > stale_after {
                    warn!(fingerprint = %key, "pending request outlived its timeout");
                }
                true
            }
            Slot::Done { expires, .. } => *expires > now,
            Slot::Failed { until, .. } => *until > now,
        });
        before - self.slots.len()
    }
}
