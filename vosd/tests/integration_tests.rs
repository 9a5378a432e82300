//! Integration tests for the vosd host runtime

use kernel_api::{ExitStatus, KernelConfig};
use vosd::{Demo, VosdConfig, VosdRuntime};

#[tokio::test]
async fn test_echo_demo() {
    let runtime = VosdRuntime::new(VosdConfig::default()).unwrap();
    let report = runtime.run().await.unwrap();

    assert_eq!(report.demo, Demo::Echo);
    assert_eq!(report.status, ExitStatus::Exited);
    assert_eq!(report.transcript, vec!["Hello World"]);
}

#[tokio::test]
async fn test_echo_demo_with_args() {
    let config = VosdConfig {
        args: vec!["good".to_string(), "morning".to_string()],
        ..VosdConfig::default()
    };
    let runtime = VosdRuntime::new(config).unwrap();
    let report = runtime.run().await.unwrap();

    assert_eq!(report.transcript, vec!["good morning"]);

    // the server announced itself on the console, not in the transcript
    let history = runtime.kernel().console().history();
    assert!(history
        .iter()
        .any(|entry| entry.message == "listening on 127.0.0.1:7000"));
}

#[tokio::test]
async fn test_ping_demo() {
    let config = VosdConfig {
        demo: Demo::Ping,
        args: vec!["2".to_string()],
        ..VosdConfig::default()
    };
    let runtime = VosdRuntime::new(config).unwrap();
    let report = runtime.run().await.unwrap();

    assert_eq!(report.status, ExitStatus::Exited);
    assert_eq!(
        report.transcript,
        vec![
            r#"request="ping 0: Hello World" result="pong 0: Hello World""#,
            r#"request="ping 1: Hello World" result="pong 1: Hello World""#,
            "client exited, server killed",
        ]
    );
}

#[tokio::test]
async fn test_ping_demo_bad_count_fails_client() {
    let config = VosdConfig {
        demo: Demo::Ping,
        args: vec!["many".to_string()],
        ..VosdConfig::default()
    };
    let runtime = VosdRuntime::new(config).unwrap();
    let report = runtime.run().await.unwrap();

    // the worker still exits; its client reported the error on stderr
    assert_eq!(report.status, ExitStatus::Exited);
    assert_eq!(report.transcript, vec!["client exited, server killed"]);
    let errors: Vec<_> = runtime
        .kernel()
        .console()
        .history()
        .into_iter()
        .filter(|entry| entry.message.starts_with("ping-client: "))
        .collect();
    assert_eq!(errors.len(), 1);
}

#[tokio::test]
async fn test_runtime_uses_kernel_config() {
    let config = VosdConfig {
        kernel: KernelConfig::default().with_first_handle(50_000),
        ..VosdConfig::default()
    };
    let runtime = VosdRuntime::new(config).unwrap();
    assert!(runtime.kernel().next_handle().as_raw() >= 50_000);
}
