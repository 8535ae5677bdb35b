/// `ExecutionCache` is fail-closed on everything except lock acquisition
/// (§4.3 "Failure semantics"): the one condition callers must branch on.
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    #[error("timed out acquiring lock {name:?} after {waited_ms}ms")]
    LockTimeout { name: String, waited_ms: u64 },
}
