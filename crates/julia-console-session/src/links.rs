//! Clickable source links in terminal output.
//!
//! The resolver is the runtime half of link handling. It receives changed
//! lines from the terminal, finds candidates with
//! [`find_candidates`](julia_console_core::find_candidates), asks the runtime
//! whether each one names a real file and remembers the ones that do.
//! Activating a link resolves its full path remotely and opens it in the
//! editor.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::json;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

use julia_console_core::{find_candidates, LinkMatch, Platform, Position, Result};
use julia_console_terminal::LinkMatcher;

use crate::rpc::RpcClient;

/// How the editor should open a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct OpenOptions {
    /// Open as a preview tab that the next open may replace
    pub pending: bool,
}

/// Opens files in the editor.
pub trait Opener: Send + Sync {
    /// Open `path` with the cursor on 0-based `line`.
    fn open(&self, path: &str, line: u32, options: OpenOptions) -> Result<()>;
}

#[derive(Debug, Default)]
struct RowLinks {
    generation: u64,
    links: Vec<LinkMatch>,
}

/// Validates link candidates against the runtime and opens them.
pub struct LinkResolver {
    client: Arc<RpcClient>,
    opener: Arc<dyn Opener>,
    platform: Platform,
    alive: AtomicBool,
    rows: Mutex<HashMap<u16, RowLinks>>,
    runtime: Option<Handle>,
}

impl std::fmt::Debug for LinkResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LinkResolver")
            .field("platform", &self.platform)
            .field("alive", &self.is_alive())
            .finish_non_exhaustive()
    }
}

impl LinkResolver {
    /// Create a live resolver. Validation tasks run on the current tokio
    /// runtime.
    pub fn new(client: Arc<RpcClient>, opener: Arc<dyn Opener>, platform: Platform) -> Arc<Self> {
        let runtime = Handle::try_current().ok();
        if runtime.is_none() {
            warn!("Link resolver created outside a runtime; links will not be validated");
        }
        Arc::new(Self {
            client,
            opener,
            platform,
            alive: AtomicBool::new(true),
            rows: Mutex::new(HashMap::new()),
            runtime,
        })
    }

    fn rows(&self) -> MutexGuard<'_, HashMap<u16, RowLinks>> {
        self.rows.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Whether the resolver still belongs to a live session.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Stop acting on validations and activations. Idempotent.
    pub fn shutdown(&self) {
        if self.alive.swap(false, Ordering::SeqCst) {
            debug!("Link resolver shut down");
        }
        self.rows().clear();
    }

    /// Validated links, ordered by row then column.
    pub fn links(&self) -> Vec<(u16, LinkMatch)> {
        let rows = self.rows();
        let mut links: Vec<(u16, LinkMatch)> = rows
            .iter()
            .flat_map(|(row, r)| r.links.iter().map(move |l| (*row, l.clone())))
            .collect();
        links.sort_by_key(|(row, l)| (*row, l.start));
        links
    }

    /// The validated link under a screen position.
    pub fn link_at(&self, position: Position) -> Option<LinkMatch> {
        self.rows()
            .get(&position.row)?
            .links
            .iter()
            .find(|l| l.contains_col(position.col as usize))
            .cloned()
    }

    /// Activate the link under `position`. `Ok(false)` if there is none.
    pub async fn activate_at(&self, position: Position) -> Result<bool> {
        match self.link_at(position) {
            Some(link) => self.activate(&link).await,
            None => Ok(false),
        }
    }

    /// Resolve `link` to a full path and open it as a preview at its line.
    ///
    /// Returns `Ok(false)` without opening anything if the session ended
    /// before or while the path was being resolved.
    pub async fn activate(&self, link: &LinkMatch) -> Result<bool> {
        if !self.is_alive() {
            debug!("Ignoring click on {}: session ended", link.text);
            return Ok(false);
        }

        let path: String = self.client.call("fullpath", vec![json!(link.path)]).await?;
        if !self.is_alive() {
            debug!("Ignoring resolved {}: session ended", path);
            return Ok(false);
        }

        info!("Opening {} at line {}", path, link.open_line());
        self.opener
            .open(&path, link.open_line(), OpenOptions { pending: true })?;
        Ok(true)
    }

    fn validate(self: &Arc<Self>, row: u16, generation: u64, candidate: LinkMatch) {
        let Some(runtime) = self.runtime.as_ref() else {
            return;
        };
        let resolver = Arc::clone(self);
        runtime.spawn(async move {
            let valid = resolver
                .client
                .call::<bool>("validatepath", vec![json!(candidate.text)])
                .await;
            match valid {
                Ok(true) => resolver.accept(row, generation, candidate),
                Ok(false) => {}
                Err(e) if e.is_disconnect() => {
                    debug!("validatepath({}) dropped: {}", candidate.text, e)
                }
                Err(e) => warn!("validatepath({}) failed: {}", candidate.text, e),
            }
        });
    }

    fn accept(&self, row: u16, generation: u64, candidate: LinkMatch) {
        if !self.is_alive() {
            debug!("Dropping late validation of {}", candidate.text);
            return;
        }
        let mut rows = self.rows();
        match rows.get_mut(&row) {
            Some(entry) if entry.generation == generation => entry.links.push(candidate),
            _ => debug!("Row {} changed before {} validated", row, candidate.text),
        }
    }
}

/// Lines are fed in through an `Arc` so validation tasks can hold the
/// resolver past the call.
#[derive(Debug)]
pub struct ResolverMatcher(pub Arc<LinkResolver>);

impl LinkMatcher for ResolverMatcher {
    fn line_changed(&self, row: u16, text: &str) {
        let resolver = &self.0;
        if !resolver.is_alive() {
            return;
        }

        let generation = {
            let mut rows = resolver.rows();
            let entry = rows.entry(row).or_default();
            entry.generation += 1;
            entry.links.clear();
            entry.generation
        };

        for candidate in find_candidates(text, resolver.platform) {
            resolver.validate(row, generation, candidate);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rpc::{Frame, ProcessHandle};
    use julia_console_terminal::MemoryPty;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct RecordingOpener {
        opened: Mutex<Vec<(String, u32, OpenOptions)>>,
    }

    impl Opener for RecordingOpener {
        fn open(&self, path: &str, line: u32, options: OpenOptions) -> Result<()> {
            self.opened
                .lock()
                .unwrap()
                .push((path.to_string(), line, options));
            Ok(())
        }
    }

    fn setup() -> (
        Arc<RpcClient>,
        mpsc::UnboundedReceiver<Frame>,
        Arc<RecordingOpener>,
        Arc<LinkResolver>,
    ) {
        let client = RpcClient::new();
        let (tx, rx) = mpsc::unbounded_channel();
        client.connect(ProcessHandle::new(MemoryPty::new()), tx);
        let opener = Arc::new(RecordingOpener::default());
        let resolver = LinkResolver::new(Arc::clone(&client), opener.clone(), Platform::Posix);
        (client, rx, opener, resolver)
    }

    async fn next_call(rx: &mut mpsc::UnboundedReceiver<Frame>) -> (u64, String, serde_json::Value) {
        match tokio::time::timeout(Duration::from_secs(1), rx.recv()).await {
            Ok(Some(Frame::Call { id, name, mut args })) => (id, name, args.remove(0)),
            other => panic!("expected a call, got {other:?}"),
        }
    }

    async fn settle() {
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
    }

    #[tokio::test]
    async fn test_validated_link_opens_at_previous_line() {
        let (client, mut rx, opener, resolver) = setup();
        let matcher = ResolverMatcher(Arc::clone(&resolver));
        matcher.line_changed(2, "ERROR: at /proj/src/a.jl:12 and /nope/x.jl");

        let mut calls = vec![next_call(&mut rx).await, next_call(&mut rx).await];
        calls.sort_by(|a, b| a.2.as_str().cmp(&b.2.as_str()));
        assert_eq!(calls[0].1, "validatepath");
        assert_eq!(calls[0].2, json!("/nope/x.jl"));
        assert_eq!(calls[1].2, json!("/proj/src/a.jl:12"));

        // Replies arrive out of order
        client.handle_frame(Frame::Response { id: calls[1].0, result: json!(true) });
        client.handle_frame(Frame::Response { id: calls[0].0, result: json!(false) });
        settle().await;

        let links = resolver.links();
        assert_eq!(links.len(), 1);
        assert_eq!(links[0].0, 2);
        assert_eq!(links[0].1.path, "/proj/src/a.jl");

        let click = {
            let resolver = Arc::clone(&resolver);
            tokio::spawn(async move { resolver.activate_at(Position::new(2, 12)).await })
        };
        let (id, name, arg) = next_call(&mut rx).await;
        assert_eq!(name, "fullpath");
        assert_eq!(arg, json!("/proj/src/a.jl"));
        client.handle_frame(Frame::Response { id, result: json!("/home/me/proj/src/a.jl") });

        assert!(click.await.unwrap().unwrap());
        assert_eq!(
            *opener.opened.lock().unwrap(),
            vec![("/home/me/proj/src/a.jl".to_string(), 11, OpenOptions { pending: true })]
        );
    }

    #[tokio::test]
    async fn test_link_without_line_opens_at_top() {
        let (client, mut rx, opener, resolver) = setup();
        let link = find_candidates("/a/b.jl", Platform::Posix).remove(0);
        let click = {
            let resolver = Arc::clone(&resolver);
            tokio::spawn(async move { resolver.activate(&link).await })
        };
        let (id, _, _) = next_call(&mut rx).await;
        client.handle_frame(Frame::Response { id, result: json!("/a/b.jl") });
        assert!(click.await.unwrap().unwrap());
        assert_eq!(opener.opened.lock().unwrap()[0].1, 0);
    }

    #[tokio::test]
    async fn test_late_validation_after_shutdown_is_ignored() {
        let (client, mut rx, opener, resolver) = setup();
        ResolverMatcher(Arc::clone(&resolver)).line_changed(0, "/a/b.jl:3");
        let (id, _, _) = next_call(&mut rx).await;

        resolver.shutdown();
        client.handle_frame(Frame::Response { id, result: json!(true) });
        settle().await;

        assert!(resolver.links().is_empty());
        let link = find_candidates("/a/b.jl:3", Platform::Posix).remove(0);
        assert!(!resolver.activate(&link).await.unwrap());
        assert!(opener.opened.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_shutdown_while_resolving_full_path() {
        let (client, mut rx, opener, resolver) = setup();
        let link = find_candidates("/a/b.jl:3", Platform::Posix).remove(0);
        let click = {
            let resolver = Arc::clone(&resolver);
            tokio::spawn(async move { resolver.activate(&link).await })
        };
        let (id, _, _) = next_call(&mut rx).await;
        resolver.shutdown();
        client.handle_frame(Frame::Response { id, result: json!("/a/b.jl") });

        assert!(!click.await.unwrap().unwrap());
        assert!(opener.opened.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_row_rewrite_discards_stale_validation() {
        let (client, mut rx, _opener, resolver) = setup();
        let matcher = ResolverMatcher(Arc::clone(&resolver));
        matcher.line_changed(0, "/old/path.jl");
        let (old_id, _, _) = next_call(&mut rx).await;

        matcher.line_changed(0, "julia> ");
        client.handle_frame(Frame::Response { id: old_id, result: json!(true) });
        settle().await;
        assert!(resolver.links().is_empty());
        assert_eq!(resolver.link_at(Position::new(0, 2)), None);
    }

    #[tokio::test]
    async fn test_disconnect_fails_validation_quietly() {
        let (client, mut rx, _opener, resolver) = setup();
        ResolverMatcher(Arc::clone(&resolver)).line_changed(0, "/a/b.jl");
        next_call(&mut rx).await;
        client.disconnect();
        settle().await;
        assert!(resolver.links().is_empty());
    }

    #[tokio::test]
    async fn test_validation_error_reply_is_not_a_link() {
        let (client, mut rx, _opener, resolver) = setup();
        ResolverMatcher(Arc::clone(&resolver)).line_changed(0, "/a/b.jl:7");
        let (id, name, _) = next_call(&mut rx).await;
        assert_eq!(name, "validatepath");

        client.handle_frame(Frame::Error {
            id,
            message: "stat failed".to_string(),
        });
        settle().await;
        assert!(resolver.is_alive());
        assert!(resolver.links().is_empty());
    }
}
