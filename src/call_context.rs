//! Logical call chains
//!
//! A call chain is the stack of call-context surveyors active for one unit of
//! work. Inside [`scope`], [`fork_scope`] or [`sync_scope`] the chain travels
//! with the task across `.await` points, whichever worker thread resumes it.
//! Outside any scope each thread has its own chain.

use parking_lot::Mutex;
use std::future::Future;
use std::sync::Arc;

tokio::task_local! {
    static CALL_CHAIN: Arc<CallChain>;
}

thread_local! {
    static THREAD_CHAIN: Arc<CallChain> = Arc::new(CallChain::default());
}

#[derive(Debug, Clone)]
struct Frame {
    surveyor_id: u64,
    scope_name: String,
}

/// Stack of active call-context surveyors
#[derive(Debug, Default)]
pub struct CallChain {
    frames: Mutex<Vec<Frame>>,
}

impl CallChain {
    /// A child chain that starts out observed by every surveyor active here
    pub fn fork(&self) -> Arc<CallChain> {
        Arc::new(CallChain {
            frames: Mutex::new(self.frames.lock().clone()),
        })
    }

    pub fn depth(&self) -> usize {
        self.frames.lock().len()
    }

    pub(crate) fn contains(&self, surveyor_id: u64) -> bool {
        self.frames
            .lock()
            .iter()
            .any(|frame| frame.surveyor_id == surveyor_id)
    }

    pub(crate) fn push(&self, surveyor_id: u64, scope_name: &str) {
        self.frames.lock().push(Frame {
            surveyor_id,
            scope_name: scope_name.to_string(),
        });
    }

    /// Pop `surveyor_id` if it is the innermost frame
    ///
    /// Otherwise leaves the chain untouched and returns the scope name of the
    /// innermost frame.
    pub(crate) fn pop_if_top(&self, surveyor_id: u64) -> Result<(), String> {
        let mut frames = self.frames.lock();
        match frames.last() {
            Some(top) if top.surveyor_id == surveyor_id => {
                frames.pop();
                Ok(())
            }
            Some(top) => Err(top.scope_name.clone()),
            None => Ok(()),
        }
    }

    /// Drop `surveyor_id` wherever it sits
    pub(crate) fn remove(&self, surveyor_id: u64) {
        self.frames
            .lock()
            .retain(|frame| frame.surveyor_id != surveyor_id);
    }
}

/// The chain of the current task, or of the current thread outside any scope
pub fn current() -> Arc<CallChain> {
    CALL_CHAIN
        .try_with(Arc::clone)
        .unwrap_or_else(|_| THREAD_CHAIN.with(Arc::clone))
}

/// Run `future` in a fresh, empty chain
pub async fn scope<F: Future>(future: F) -> F::Output {
    CALL_CHAIN.scope(Arc::new(CallChain::default()), future).await
}

/// Run `future` in a child of the current chain
///
/// Use this when spawning work that belongs to the current unit of work:
/// surveyors active here observe the child, while surveyors created inside
/// the child stay local to it. The current chain is captured when this is
/// called, not when the returned future is first polled.
pub fn fork_scope<F: Future>(future: F) -> impl Future<Output = F::Output> {
    CALL_CHAIN.scope(current().fork(), future)
}

/// Run `f` synchronously in a fresh, empty chain
pub fn sync_scope<R>(f: impl FnOnce() -> R) -> R {
    CALL_CHAIN.sync_scope(Arc::new(CallChain::default()), f)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_pop_in_order() {
        let chain = CallChain::default();
        chain.push(1, "outer");
        chain.push(2, "inner");
        assert_eq!(chain.depth(), 2);
        assert!(chain.pop_if_top(2).is_ok());
        assert!(chain.pop_if_top(1).is_ok());
        assert_eq!(chain.depth(), 0);
    }

    #[test]
    fn test_pop_out_of_order_reports_top() {
        let chain = CallChain::default();
        chain.push(1, "outer");
        chain.push(2, "inner");
        assert_eq!(chain.pop_if_top(1), Err("inner".to_string()));
        assert_eq!(chain.depth(), 2);
    }

    #[test]
    fn test_fork_copies_frames() {
        let parent = CallChain::default();
        parent.push(7, "request");
        let child = parent.fork();
        assert!(child.contains(7));
        child.push(8, "subtask");
        assert!(!parent.contains(8));
    }

    #[test]
    fn test_threads_have_separate_chains() {
        let here = current();
        here.push(99, "main-thread");
        let seen_elsewhere = std::thread::spawn(|| current().contains(99))
            .join()
            .unwrap();
        assert!(!seen_elsewhere);
        here.remove(99);
    }

    #[test]
    fn test_sync_scope_isolated_from_thread_chain() {
        let here = current();
        here.push(5, "thread-level");
        let inside = sync_scope(|| current().contains(5));
        assert!(!inside);
        here.remove(5);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_scope_follows_task_across_threads() {
        scope(async {
            current().push(11, "task");
            let task = tokio::spawn(fork_scope(async {
                tokio::task::yield_now().await;
                current().contains(11)
            }));
            assert!(task.await.unwrap());
            tokio::task::yield_now().await;
            assert!(current().contains(11));
        })
        .await;
    }
}
