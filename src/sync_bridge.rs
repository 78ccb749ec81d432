use crate::error::DaoError;
use std::future::Future;
use tokio::runtime::{Handle, RuntimeFlavor};

/// Drives an engine future to completion from synchronous code.
///
/// Outside a runtime the future runs on `rt`. Inside a multi-threaded
/// runtime the current worker is handed over with `block_in_place` first.
/// A current-thread runtime can not be blocked from within, so that case is
/// rejected instead of deadlocking.
pub fn block_on_engine<F, T>(rt: &Handle, f: F) -> Result<T, DaoError>
where
    F: Future<Output = Result<T, DaoError>>,
{
    match Handle::try_current() {
        Ok(current) if current.runtime_flavor() == RuntimeFlavor::CurrentThread => {
            Err(DaoError::InvalidConfig {
                message: "blocking execution is not supported inside a current-thread runtime"
                    .into(),
            })
        }
        Ok(_) => tokio::task::block_in_place(|| rt.block_on(f)),
        Err(_) => rt.block_on(f),
    }
}

#[cfg(test)]
mod tests {
    use super::block_on_engine;
    use crate::error::DaoError;
    use tokio::runtime::Runtime;

    #[test]
    fn blocks_outside_a_runtime() {
        let rt = Runtime::new().expect("runtime");
        let value = block_on_engine(rt.handle(), async { Ok::<_, DaoError>(7) }).expect("value");
        assert_eq!(value, 7);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blocks_inside_a_multi_thread_runtime() {
        let handle = tokio::runtime::Handle::current();
        let value = block_on_engine(&handle, async {
            tokio::task::yield_now().await;
            Ok::<_, DaoError>("done")
        })
        .expect("value");
        assert_eq!(value, "done");
    }

    #[tokio::test]
    async fn rejects_current_thread_runtime() {
        let handle = tokio::runtime::Handle::current();
        let err = block_on_engine(&handle, async { Ok::<_, DaoError>(()) }).expect_err("rejected");
        assert_eq!(err.code_str(), "invalid_config");
    }
}
