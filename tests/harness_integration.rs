//! End-to-end checks of the offline surface: config loading, test-file
//! discovery and parsing, and client lifecycle guards. Everything here runs
//! without a network or a live MCP server.

use std::path::Path;

use mcptest::{find_test_files, load_config, load_test_file, ConfigError, TestClient};

fn write(dir: &tempfile::TempDir, name: &str, body: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    std::fs::write(&path, body).unwrap();
    path
}

#[test]
fn config_loads_with_env_placeholders_resolved() {
    std::env::set_var("HARNESS_IT_API_KEY", "sk-integration");
    std::env::set_var("HARNESS_IT_TOKEN", "bearer-token");

    let dir = tempfile::tempdir().unwrap();
    let path = write(
        &dir,
        "mcp.config.json",
        r#"{
            "version": "1",
            "mcpClient": {
                "provider": "anthropic",
                "model": "claude-sonnet-4-20250514",
                "api_key_env": "HARNESS_IT_API_KEY"
            },
            "mcpServers": {
                "local": { "type": "stdio", "command": "npx", "args": ["-y", "some-server"] },
                "remote": {
                    "type": "http",
                    "url": "http://localhost:3000/mcp",
                    "headers": { "Authorization": "${env:HARNESS_IT_TOKEN}" }
                }
            }
        }"#,
    );

    let config = load_config(&path).unwrap();
    assert_eq!(config.llm.api_key, "sk-integration");
    let names: Vec<_> = config.servers.keys().cloned().collect();
    assert_eq!(names, vec!["local", "remote"]);
}

#[test]
fn missing_config_reports_not_found() {
    let err = load_config(Path::new("/nonexistent/mcp.config.json")).unwrap_err();
    assert!(matches!(err, ConfigError::NotFound(_)));
}

#[test]
fn suite_discovery_and_parse() {
    let dir = tempfile::tempdir().unwrap();
    write(
        &dir,
        "02-coin.test.yaml",
        "description: Coin flipping\nsteps:\n  - prompt: Flip a coin\n  - assert: a coin tool was called\n",
    );
    write(
        &dir,
        "01-dice.test.yaml",
        "description: Dice rolling\nsteps:\n  - prompt: Roll a d6\n  - assert: a dice tool was called\n",
    );
    write(&dir, "README.md", "not a test\n");

    let files = find_test_files(dir.path()).unwrap();
    assert_eq!(files.len(), 2);
    assert!(files[0].ends_with("01-dice.test.yaml"));
    assert!(files[1].ends_with("02-coin.test.yaml"));

    let test = load_test_file(&files[0]).unwrap();
    assert_eq!(test.description, "Dice rolling");
    assert_eq!(test.steps.len(), 2);
}

#[tokio::test]
async fn client_lifecycle_guards() {
    std::env::set_var("HARNESS_IT_API_KEY", "sk-integration");
    let dir = tempfile::tempdir().unwrap();
    let path = write(
        &dir,
        "mcp.config.json",
        r#"{
            "mcpClient": {
                "provider": "openai",
                "model": "gpt-4o",
                "api_key_env": "HARNESS_IT_API_KEY"
            },
            "mcpServers": {}
        }"#,
    );

    let mut client = TestClient::new(load_config(&path).unwrap());
    assert!(client.prompt("hi").await.is_err());

    client.connect().await.unwrap();
    assert!(client.is_connected());
    assert!(client.connect().await.is_err());

    client.disconnect().await;
    assert!(!client.is_connected());
    client.disconnect().await;
}
