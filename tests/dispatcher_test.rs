use anyhow::Result;
use async_trait::async_trait;
use gitgym::config::{ContentConfig, SandboxConfig};
use gitgym::sandbox::{CreateSpec, ExecResult, ExecSpec, SandboxRuntime, EDITOR_SENTINEL};
use gitgym::storage::{BindingKey, ExerciseId, LogEntry, LogMode, SandboxId, SessionId, SessionStore};
use gitgym::{DispatchError, Dispatcher, Provisioner, ResultKind, Runner};
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;

/// In-memory store, enough for dispatcher behavior without SQLite
#[derive(Clone, Default)]
struct InMemoryStore {
    bindings: Arc<Mutex<HashMap<BindingKey, SandboxId>>>,
    logs: Arc<Mutex<HashMap<BindingKey, Vec<LogEntry>>>>,
}

#[async_trait]
impl SessionStore for InMemoryStore {
    async fn sandbox_for(&self, key: &BindingKey) -> Result<Option<SandboxId>> {
        Ok(self.bindings.lock().unwrap().get(key).cloned())
    }

    async fn bind_sandbox(&self, key: &BindingKey, sandbox: &SandboxId) -> Result<()> {
        self.bindings
            .lock()
            .unwrap()
            .insert(key.clone(), sandbox.clone());
        Ok(())
    }

    async fn last_entry(&self, key: &BindingKey) -> Result<Option<LogEntry>> {
        Ok(self
            .logs
            .lock()
            .unwrap()
            .get(key)
            .and_then(|log| log.last().cloned()))
    }

    async fn append_entry(&self, key: &BindingKey, entry: LogEntry) -> Result<()> {
        self.logs
            .lock()
            .unwrap()
            .entry(key.clone())
            .or_default()
            .push(entry);
        Ok(())
    }

    async fn entries(&self, key: &BindingKey) -> Result<Vec<LogEntry>> {
        Ok(self
            .logs
            .lock()
            .unwrap()
            .get(key)
            .cloned()
            .unwrap_or_default())
    }

    async fn remove_binding(&self, key: &BindingKey) -> Result<()> {
        self.bindings.lock().unwrap().remove(key);
        self.logs.lock().unwrap().remove(key);
        Ok(())
    }

    async fn session_bindings(&self, session: &SessionId) -> Result<Vec<BindingKey>> {
        let mut keys: HashSet<BindingKey> = HashSet::new();
        keys.extend(self.bindings.lock().unwrap().keys().cloned());
        keys.extend(self.logs.lock().unwrap().keys().cloned());
        Ok(keys
            .into_iter()
            .filter(|key| &key.session == session)
            .collect())
    }
}

/// Scripted engine fake. Provisioning execs (root seeding, hook install)
/// always succeed; user command execs pop from the scripted queue and
/// default to empty success.
#[derive(Default)]
struct FakeRuntime {
    live: Mutex<HashSet<String>>,
    created: Mutex<Vec<String>>,
    removed: Mutex<Vec<String>>,
    command_execs: Mutex<Vec<ExecSpec>>,
    responses: Mutex<VecDeque<ExecResult>>,
    listing_fails: Mutex<bool>,
}

impl FakeRuntime {
    fn ok(stdout: &str) -> ExecResult {
        ExecResult {
            stdout: stdout.to_string(),
            stderr: String::new(),
            exit_code: 0,
        }
    }

    fn push_response(&self, result: ExecResult) {
        self.responses.lock().unwrap().push_back(result);
    }

    fn kill(&self, sandbox: &SandboxId) {
        self.live.lock().unwrap().remove(sandbox.as_str());
    }

    fn created_count(&self) -> usize {
        self.created.lock().unwrap().len()
    }

    fn command_execs(&self) -> Vec<ExecSpec> {
        self.command_execs.lock().unwrap().clone()
    }
}

#[async_trait]
impl SandboxRuntime for FakeRuntime {
    async fn create(&self, name: &str, _spec: &CreateSpec) -> Result<String> {
        self.live.lock().unwrap().insert(name.to_string());
        self.created.lock().unwrap().push(name.to_string());
        Ok(format!("engine-{name}"))
    }

    async fn exec(&self, _sandbox: &str, spec: &ExecSpec) -> Result<ExecResult> {
        let is_provisioning =
            spec.user.as_deref() == Some("root") || spec.argv.first().map(String::as_str) == Some("git");

        if is_provisioning {
            return Ok(Self::ok(""));
        }

        self.command_execs.lock().unwrap().push(spec.clone());
        Ok(self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| Self::ok("")))
    }

    async fn containers_named(&self, name: &str) -> Result<Vec<String>> {
        if *self.listing_fails.lock().unwrap() {
            anyhow::bail!("engine unreachable");
        }
        Ok(self
            .live
            .lock()
            .unwrap()
            .iter()
            .filter(|n| n.as_str() == name)
            .cloned()
            .collect())
    }

    async fn remove(&self, name: &str) -> Result<()> {
        self.live.lock().unwrap().remove(name);
        self.removed.lock().unwrap().push(name.to_string());
        Ok(())
    }
}

struct Harness {
    dispatcher: Dispatcher<InMemoryStore>,
    store: InMemoryStore,
    runtime: Arc<FakeRuntime>,
    _content: TempDir,
}

fn harness() -> Harness {
    let content = tempfile::tempdir().expect("tempdir");
    std::fs::create_dir_all(content.path().join("exercises/1")).expect("seed dir");
    std::fs::create_dir_all(content.path().join("exercises/2")).expect("seed dir");
    std::fs::create_dir_all(content.path().join("editor")).expect("editor dir");

    let content_config = ContentConfig {
        exercises_dir: content.path().join("exercises").display().to_string(),
        origins_dir: content.path().join("origins").display().to_string(),
        upstreams_dir: content.path().join("upstreams").display().to_string(),
        editor_dir: content.path().join("editor").display().to_string(),
    };
    let sandbox_config = SandboxConfig::default();

    let runtime = Arc::new(FakeRuntime::default());
    let store = InMemoryStore::default();

    let provisioner = Provisioner::new(
        runtime.clone(),
        sandbox_config.clone(),
        content_config,
        Duration::from_secs(5),
    );
    let runner = Runner::new(runtime.clone(), &sandbox_config, Duration::from_secs(5));
    let dispatcher = Dispatcher::new(store.clone(), provisioner, runner, sandbox_config);

    Harness {
        dispatcher,
        store,
        runtime,
        _content: content,
    }
}

fn key(session: &str, exercise: i64) -> BindingKey {
    BindingKey {
        session: SessionId::from(session),
        exercise: ExerciseId(exercise),
    }
}

#[tokio::test]
async fn first_command_provisions_once_and_logs() {
    let h = harness();

    let reply = h
        .dispatcher
        .submit(
            SessionId::from("s1"),
            ExerciseId(1),
            LogMode::Command,
            "git status".to_string(),
        )
        .await
        .unwrap();

    assert_eq!(reply.result, ResultKind::Success);
    assert_eq!(h.runtime.created_count(), 1);

    let log = h.store.entries(&key("s1", 1)).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].mode, LogMode::Command);
    assert_eq!(log[0].message, "git status");
    assert!(h.store.sandbox_for(&key("s1", 1)).await.unwrap().is_some());
}

#[tokio::test]
async fn sandbox_persists_across_requests() {
    let h = harness();
    let session = SessionId::from("s1");

    for message in ["git init", "git status", "git log"] {
        h.dispatcher
            .submit(
                session.clone(),
                ExerciseId(1),
                LogMode::Command,
                message.to_string(),
            )
            .await
            .unwrap();
    }

    assert_eq!(h.runtime.created_count(), 1);
    assert_eq!(h.store.entries(&key("s1", 1)).await.unwrap().len(), 3);
}

#[tokio::test]
async fn editor_prompt_then_editor_input() {
    let h = harness();
    let session = SessionId::from("s1");

    h.runtime.push_response(FakeRuntime::ok(&format!(
        "hint: enter a message\n{EDITOR_SENTINEL}"
    )));

    let reply = h
        .dispatcher
        .submit(
            session.clone(),
            ExerciseId(1),
            LogMode::Command,
            "git commit".to_string(),
        )
        .await
        .unwrap();

    assert_eq!(reply.result, ResultKind::EditorPrompt);
    assert_eq!(reply.message, "hint: enter a message\n");

    let reply = h
        .dispatcher
        .submit(
            session.clone(),
            ExerciseId(1),
            LogMode::Editor,
            "fix the tests".to_string(),
        )
        .await
        .unwrap();

    assert_eq!(reply.result, ResultKind::Success);

    // The editor invocation pipes the payload into the pending command
    let execs = h.runtime.command_execs();
    assert_eq!(execs.len(), 2);
    let script = execs[1].argv.join(" ");
    assert!(script.contains("fix the tests"));
    assert!(script.contains("git commit"));

    let log = h.store.entries(&key("s1", 1)).await.unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[1].mode, LogMode::Editor);
}

#[tokio::test]
async fn editor_as_first_request_is_rejected_without_a_sandbox() {
    let h = harness();

    let err = h
        .dispatcher
        .submit(
            SessionId::from("s1"),
            ExerciseId(1),
            LogMode::Editor,
            "stray input".to_string(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::Protocol(_)));
    assert!(h.store.entries(&key("s1", 1)).await.unwrap().is_empty());
    assert_eq!(h.runtime.created_count(), 0);
    assert!(h.store.sandbox_for(&key("s1", 1)).await.unwrap().is_none());
}

#[tokio::test]
async fn consecutive_editor_requests_are_rejected() {
    let h = harness();
    let session = SessionId::from("s1");

    h.dispatcher
        .submit(
            session.clone(),
            ExerciseId(1),
            LogMode::Command,
            "git commit".to_string(),
        )
        .await
        .unwrap();
    h.dispatcher
        .submit(
            session.clone(),
            ExerciseId(1),
            LogMode::Editor,
            "message one".to_string(),
        )
        .await
        .unwrap();

    let err = h
        .dispatcher
        .submit(
            session.clone(),
            ExerciseId(1),
            LogMode::Editor,
            "message two".to_string(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::Protocol(_)));

    // Rejection mutated nothing
    let log = h.store.entries(&key("s1", 1)).await.unwrap();
    assert_eq!(log.len(), 2);
}

#[tokio::test]
async fn failed_execution_is_still_recorded_in_order() {
    let h = harness();
    let session = SessionId::from("s1");

    h.runtime.push_response(ExecResult {
        stdout: String::new(),
        stderr: "fatal: not a git repository\n".to_string(),
        exit_code: 128,
    });

    let reply = h
        .dispatcher
        .submit(
            session.clone(),
            ExerciseId(1),
            LogMode::Command,
            "git log".to_string(),
        )
        .await
        .unwrap();

    assert_eq!(reply.result, ResultKind::Fail);
    assert_eq!(reply.message, "fatal: not a git repository\n");

    h.dispatcher
        .submit(
            session.clone(),
            ExerciseId(1),
            LogMode::Command,
            "git init".to_string(),
        )
        .await
        .unwrap();

    let log = h.store.entries(&key("s1", 1)).await.unwrap();
    assert_eq!(log.len(), 2);
    assert_eq!(log[0].message, "git log");
    assert_eq!(log[1].message, "git init");
}

#[tokio::test]
async fn stale_sandbox_triggers_exactly_one_reprovision() {
    let h = harness();
    let session = SessionId::from("s1");

    h.dispatcher
        .submit(
            session.clone(),
            ExerciseId(1),
            LogMode::Command,
            "git status".to_string(),
        )
        .await
        .unwrap();

    let stale = h.store.sandbox_for(&key("s1", 1)).await.unwrap().unwrap();
    h.runtime.kill(&stale);

    h.dispatcher
        .submit(
            session.clone(),
            ExerciseId(1),
            LogMode::Command,
            "git status".to_string(),
        )
        .await
        .unwrap();

    assert_eq!(h.runtime.created_count(), 2);
    let fresh = h.store.sandbox_for(&key("s1", 1)).await.unwrap().unwrap();
    assert_ne!(fresh, stale);
}

#[tokio::test]
async fn engine_unreachable_is_an_internal_error() {
    let h = harness();

    h.dispatcher
        .submit(
            SessionId::from("s1"),
            ExerciseId(1),
            LogMode::Command,
            "git status".to_string(),
        )
        .await
        .unwrap();

    *h.runtime.listing_fails.lock().unwrap() = true;

    let err = h
        .dispatcher
        .submit(
            SessionId::from("s1"),
            ExerciseId(1),
            LogMode::Command,
            "git status".to_string(),
        )
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::Internal(_)));
}

#[tokio::test]
async fn delete_binding_then_reuse_starts_fresh() {
    let h = harness();
    let session = SessionId::from("s1");

    h.dispatcher
        .submit(
            session.clone(),
            ExerciseId(1),
            LogMode::Command,
            "git status".to_string(),
        )
        .await
        .unwrap();
    let sandbox = h.store.sandbox_for(&key("s1", 1)).await.unwrap().unwrap();

    h.dispatcher
        .delete_binding(session.clone(), ExerciseId(1))
        .await
        .unwrap();

    assert!(h
        .runtime
        .removed
        .lock()
        .unwrap()
        .contains(&sandbox.as_str().to_string()));
    assert!(h.store.sandbox_for(&key("s1", 1)).await.unwrap().is_none());
    assert!(h.store.entries(&key("s1", 1)).await.unwrap().is_empty());

    // Same key behaves as never used
    h.dispatcher
        .submit(
            session.clone(),
            ExerciseId(1),
            LogMode::Command,
            "git init".to_string(),
        )
        .await
        .unwrap();

    assert_eq!(h.runtime.created_count(), 2);
    let log = h.store.entries(&key("s1", 1)).await.unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].message, "git init");
}

#[tokio::test]
async fn delete_session_drops_only_that_sessions_bindings() {
    let h = harness();

    for (session, exercise) in [("s1", 1), ("s1", 2), ("s2", 1)] {
        h.dispatcher
            .submit(
                SessionId::from(session),
                ExerciseId(exercise),
                LogMode::Command,
                "git status".to_string(),
            )
            .await
            .unwrap();
    }

    h.dispatcher
        .delete_session(SessionId::from("s1"))
        .await
        .unwrap();

    assert!(h.store.sandbox_for(&key("s1", 1)).await.unwrap().is_none());
    assert!(h.store.sandbox_for(&key("s1", 2)).await.unwrap().is_none());
    assert!(h.store.sandbox_for(&key("s2", 1)).await.unwrap().is_some());
}

#[tokio::test]
async fn restore_replays_whole_log_as_one_batch() {
    let h = harness();
    let k = key("s1", 1);

    for entry in [
        LogEntry {
            mode: LogMode::Command,
            message: "git init".to_string(),
        },
        LogEntry {
            mode: LogMode::Command,
            message: "git commit".to_string(),
        },
        LogEntry {
            mode: LogMode::Editor,
            message: "first commit".to_string(),
        },
    ] {
        h.store.append_entry(&k, entry).await.unwrap();
    }

    let fresh = h
        .dispatcher
        .restore(SessionId::from("s1"), ExerciseId(1))
        .await
        .unwrap();

    assert_eq!(h.runtime.created_count(), 1);
    assert_eq!(h.store.sandbox_for(&k).await.unwrap(), Some(fresh));

    // One combined invocation carrying all three entries in order
    let execs = h.runtime.command_execs();
    assert_eq!(execs.len(), 1);
    assert_eq!(execs[0].argv[0], "sh");
    let script = &execs[0].argv[2];
    let lines: Vec<&str> = script.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[0].contains("git init"));
    assert!(lines[1].contains("git commit"));
    assert!(lines[2].contains("first commit"));
}

#[tokio::test]
async fn restore_rejects_corrupt_log_before_executing() {
    let h = harness();
    let k = key("s1", 1);

    h.store
        .append_entry(
            &k,
            LogEntry {
                mode: LogMode::Editor,
                message: "orphaned input".to_string(),
            },
        )
        .await
        .unwrap();

    let err = h
        .dispatcher
        .restore(SessionId::from("s1"), ExerciseId(1))
        .await
        .unwrap_err();

    assert!(matches!(err, DispatchError::LogIntegrity(_)));
    assert_eq!(h.runtime.created_count(), 0);
    assert!(h.runtime.command_execs().is_empty());
}

#[tokio::test]
async fn restore_of_empty_log_just_provisions() {
    let h = harness();

    let fresh = h
        .dispatcher
        .restore(SessionId::from("s1"), ExerciseId(1))
        .await
        .unwrap();

    assert_eq!(h.runtime.created_count(), 1);
    assert!(h.runtime.command_execs().is_empty());
    assert_eq!(
        h.store.sandbox_for(&key("s1", 1)).await.unwrap(),
        Some(fresh)
    );
}

#[tokio::test]
async fn bindings_are_independent_across_exercises() {
    let h = harness();
    let session = SessionId::from("s1");

    h.dispatcher
        .submit(
            session.clone(),
            ExerciseId(1),
            LogMode::Command,
            "git status".to_string(),
        )
        .await
        .unwrap();
    h.dispatcher
        .submit(
            session.clone(),
            ExerciseId(2),
            LogMode::Command,
            "git log".to_string(),
        )
        .await
        .unwrap();

    assert_eq!(h.runtime.created_count(), 2);
    let first = h.store.sandbox_for(&key("s1", 1)).await.unwrap().unwrap();
    let second = h.store.sandbox_for(&key("s1", 2)).await.unwrap().unwrap();
    assert_ne!(first, second);
}
