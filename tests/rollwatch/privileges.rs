use std::env;
use std::fs;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};

use rollwatch::rollwatch::client::cli::CliClient;
use rollwatch::rollwatch::client::{with_privileges, IdentityGateway, PrivilegedContext};
use rollwatch::rollwatch::util::new_error;

use crate::support::{init_logging, TempTool};

struct LoginRecorder {
    tool: TempTool,
    log: PathBuf,
}

impl LoginRecorder {
    /// CLI stub that records every invocation and answers `whoami` with the
    /// developer identity.
    fn new(tag: &str) -> Self {
        static SEQ: AtomicUsize = AtomicUsize::new(0);
        let unique = SEQ.fetch_add(1, Ordering::SeqCst);
        let log = env::temp_dir().join(format!(
            "rollwatch-logins-{tag}-{}-{unique}",
            std::process::id()
        ));
        let body = format!(
            "echo \"$@\" >> {}\ncase \"$1\" in\n  whoami) echo developer;;\nesac",
            log.display()
        );
        Self {
            tool: TempTool::new(tag, &body),
            log,
        }
    }

    fn client(&self) -> CliClient {
        CliClient::with_tool(self.tool.as_str(), "myproject")
    }

    fn recorded(&self) -> Vec<String> {
        fs::read_to_string(&self.log)
            .unwrap_or_default()
            .lines()
            .map(str::to_string)
            .collect()
    }
}

impl Drop for LoginRecorder {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.log);
    }
}

#[tokio::test]
async fn privileged_scope_restores_previous_login_on_success() {
    init_logging();
    let recorder = LoginRecorder::new("priv-ok");
    let client = recorder.client();

    let value = with_privileges(&client, "system:admin", || async { Ok(42) })
        .await
        .expect("privileged operation succeeds");
    assert_eq!(value, 42);

    assert_eq!(
        recorder.recorded(),
        ["whoami", "login -u system:admin", "login -u developer"]
    );
}

#[tokio::test]
async fn privileged_scope_restores_previous_login_on_failure() {
    init_logging();
    let recorder = LoginRecorder::new("priv-err");
    let client = recorder.client();

    let err = with_privileges(&client, "system:admin", || async {
        Err::<(), _>(new_error("operation blew up"))
    })
    .await
    .expect_err("operation error must surface");
    assert_eq!(err.to_string(), "operation blew up");

    // The restore still ran, exactly once.
    assert_eq!(
        recorder.recorded(),
        ["whoami", "login -u system:admin", "login -u developer"]
    );
}

#[tokio::test]
async fn acquire_records_the_identity_to_restore() {
    init_logging();
    let recorder = LoginRecorder::new("priv-acquire");
    let client = recorder.client();

    let context = PrivilegedContext::acquire(&client, "system:admin")
        .await
        .expect("elevation succeeds");
    assert_eq!(context.previous_identity(), "developer");
    context.restore(&client).await.expect("restore succeeds");

    assert_eq!(
        recorder.recorded(),
        ["whoami", "login -u system:admin", "login -u developer"]
    );
}

#[tokio::test]
async fn failed_elevation_never_switches_identity() {
    init_logging();
    let tool = TempTool::new("priv-refused", "echo 'error: login refused' >&2\nexit 1");
    let client = CliClient::with_tool(tool.as_str(), "myproject");

    let err = with_privileges(&client, "system:admin", || async { Ok(()) })
        .await
        .expect_err("elevation failure must surface");
    assert!(err.to_string().contains("login refused"));
    // The gateway itself stays broken; no identity was ever switched.
    assert!(client.current_identity().await.is_err());
}
