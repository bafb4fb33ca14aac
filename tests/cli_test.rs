//! CLI integration tests for oneof-routing binary.

use assert_cmd::Command;
use predicates::prelude::*;
use serde_json::Value;
use std::fs;
use tempfile::TempDir;

const FIXTURE: &str = "tests/fixtures/ingestion.json";

fn cmd() -> Command {
    Command::new(assert_cmd::cargo::cargo_bin!("oneof-routing"))
}

// Helper to create a temp file
fn write_temp_file(dir: &TempDir, name: &str, content: &str) -> std::path::PathBuf {
    let path = dir.path().join(name);
    fs::write(&path, content).unwrap();
    path
}

fn stdout_json(output: &std::process::Output) -> Value {
    serde_json::from_slice(&output.stdout).unwrap()
}

mod resolve_command {
    use super::*;

    #[test]
    fn basic_resolve() {
        cmd()
            .args([
                "resolve",
                FIXTURE,
                "-r",
                "authentications",
                "-o",
                "createAuthentication",
                "--select",
                "input=auth_basic",
                "--input",
                "name=my-auth",
                "--input",
                "username=admin",
                "--input",
                "password=s3cret",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""method":"POST""#))
            .stdout(predicate::str::contains(
                r#""url":"https://data.us.example.com/1/authentications""#,
            ))
            .stdout(predicate::str::contains(r#""type":"basic""#))
            .stdout(predicate::str::contains(r#""username":"admin""#));
    }

    #[test]
    fn resolve_with_pretty() {
        cmd()
            .args([
                "resolve",
                FIXTURE,
                "-r",
                "authentications",
                "-o",
                "getAuthentication",
                "--input",
                "authenticationID=a1",
                "--pretty",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("{\n  \"method\": \"GET\""));
    }

    #[test]
    fn resolve_with_inputs_file() {
        let dir = TempDir::new().unwrap();
        let inputs = write_temp_file(
            &dir,
            "inputs.json",
            r#"{"indexName": "products", "hitsPerPage": 5, "attributesToRetrieve": ["title"]}"#,
        );

        cmd()
            .args([
                "resolve",
                FIXTURE,
                "-r",
                "indexes",
                "-o",
                "search",
                "--inputs",
                inputs.to_str().unwrap(),
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#""hitsPerPage":5"#))
            .stdout(predicate::str::contains(r#""attributesToRetrieve":"title""#));
    }

    #[test]
    fn input_flag_overrides_inputs_file() {
        let dir = TempDir::new().unwrap();
        let inputs = write_temp_file(&dir, "inputs.json", r#"{"indexName": "products"}"#);

        cmd()
            .args([
                "resolve",
                FIXTURE,
                "-r",
                "indexes",
                "-o",
                "search",
                "--inputs",
                inputs.to_str().unwrap(),
                "--input",
                "indexName=articles",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("/1/indexes/articles/query"));
    }

    #[test]
    fn resolve_with_output_file() {
        let dir = TempDir::new().unwrap();
        let output = dir.path().join("request.json");

        cmd()
            .args([
                "resolve",
                FIXTURE,
                "-r",
                "indexes",
                "-o",
                "search",
                "--input",
                "indexName=products",
                "--output",
                output.to_str().unwrap(),
            ])
            .assert()
            .success();

        let content = fs::read_to_string(&output).unwrap();
        let request: Value = serde_json::from_str(&content).unwrap();
        assert_eq!(
            request["url"],
            "https://data.us.example.com/1/indexes/products/query"
        );
    }

    #[test]
    fn resolve_with_base_url() {
        cmd()
            .args([
                "resolve",
                FIXTURE,
                "-r",
                "indexes",
                "-o",
                "search",
                "--input",
                "indexName=products",
                "--base-url",
                "http://localhost:9000",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains(
                r#""url":"http://localhost:9000/1/indexes/products/query""#,
            ));
    }

    #[test]
    fn nested_variant_selection() {
        let output = cmd()
            .args([
                "resolve",
                FIXTURE,
                "-r",
                "sources",
                "-o",
                "createSource",
                "--select",
                "input=source_bigquery",
                "--select",
                "partition=partition_time",
                "--input",
                "name=bq",
                "--input",
                "projectID=p-1",
                "--input",
                "partitionField=created_at",
            ])
            .output()
            .unwrap();

        assert!(output.status.success());
        let request = stdout_json(&output);
        assert_eq!(request["body"]["input"]["partition"]["field"], "created_at");
        assert_eq!(request["body"]["input"]["partition"]["granularity"], "day");
    }
}

mod error_handling {
    use super::*;

    #[test]
    fn validation_failure_lists_issues() {
        cmd()
            .args([
                "resolve",
                FIXTURE,
                "-r",
                "authentications",
                "-o",
                "createAuthentication",
                "--select",
                "input=auth_basic",
                "--input",
                "username=admin",
            ])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("Validation failed:"))
            .stderr(predicate::str::contains("name: required field is missing"))
            .stderr(predicate::str::contains("password: required field is missing"));
    }

    #[test]
    fn malformed_json_input() {
        cmd()
            .args([
                "resolve",
                FIXTURE,
                "-r",
                "indexes",
                "-o",
                "search",
                "--input",
                "indexName=products",
                "--input",
                r#"facetFilters="{invalid""#,
            ])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("malformed JSON at line 1, column 2"));
    }

    #[test]
    fn unknown_operation() {
        cmd()
            .args(["resolve", FIXTURE, "-r", "indexes", "-o", "deleteIndex"])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("unknown operation indexes/deleteIndex"));
    }

    #[test]
    fn file_not_found() {
        cmd()
            .args([
                "resolve",
                "/nonexistent/schema.json",
                "-r",
                "indexes",
                "-o",
                "search",
            ])
            .assert()
            .code(3)
            .stderr(predicate::str::contains("file not found"));
    }

    #[test]
    fn invalid_json_schema() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(&dir, "schema.json", "{ not valid json }");

        cmd()
            .args(["resolve", schema.to_str().unwrap(), "-r", "a", "-o", "b"])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("invalid JSON"));
    }

    #[test]
    fn defective_schema_rejected() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(
            &dir,
            "schema.json",
            r#"{"properties": [
                {"name": "resource", "type": "enum", "options": [{"name": "A", "value": "a"}]},
                {"name": "operation", "type": "enum",
                 "options": [{"name": "B", "value": "b", "routing": {"request": {"url": "/b"}}}]},
                {"name": "x", "type": "string", "displayOptions": {"show": {"missing": [true]}}}
            ]}"#,
        );

        cmd()
            .args(["resolve", schema.to_str().unwrap(), "-r", "a", "-o", "b"])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("unknown field 'missing'"));
    }

    #[test]
    fn malformed_pair() {
        cmd()
            .args([
                "resolve",
                FIXTURE,
                "-r",
                "indexes",
                "-o",
                "search",
                "--input",
                "novalue",
            ])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("expected FIELD=VALUE"));
    }

    #[test]
    fn inputs_file_must_be_object() {
        let dir = TempDir::new().unwrap();
        let inputs = write_temp_file(&dir, "inputs.json", "[1, 2]");

        cmd()
            .args([
                "resolve",
                FIXTURE,
                "-r",
                "indexes",
                "-o",
                "search",
                "--inputs",
                inputs.to_str().unwrap(),
            ])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("must contain a JSON object"));
    }
}

mod batch_command {
    use super::*;

    #[test]
    fn batch_all_succeed() {
        let dir = TempDir::new().unwrap();
        let invocations = write_temp_file(
            &dir,
            "invocations.json",
            r#"[
                {"discriminant": {"resource": "indexes", "operation": "search"},
                 "inputs": {"indexName": "products"}},
                {"discriminant": {"resource": "authentications", "operation": "getAuthentication"},
                 "inputs": {"authenticationID": "a1"}}
            ]"#,
        );

        let output = cmd()
            .args(["batch", FIXTURE, invocations.to_str().unwrap()])
            .output()
            .unwrap();

        assert!(output.status.success());
        let results = stdout_json(&output);
        let results = results.as_array().unwrap();
        assert_eq!(results.len(), 2);
        assert_eq!(
            results[1]["request"]["url"],
            "https://data.us.example.com/1/authentications/a1"
        );
    }

    #[test]
    fn batch_reports_failures_in_place() {
        let dir = TempDir::new().unwrap();
        let invocations = write_temp_file(
            &dir,
            "invocations.json",
            r#"[
                {"discriminant": {"resource": "indexes", "operation": "search"}},
                {"discriminant": {"resource": "indexes", "operation": "search"},
                 "inputs": {"indexName": "products"}},
                {"discriminant": {"resource": "indexes", "operation": "deleteIndex"}}
            ]"#,
        );

        let output = cmd()
            .args(["batch", FIXTURE, invocations.to_str().unwrap(), "--pretty"])
            .output()
            .unwrap();

        assert_eq!(output.status.code(), Some(1));
        let results = stdout_json(&output);
        assert_eq!(results[0]["error"], "invalid");
        assert_eq!(results[0]["issues"][0]["field"], "indexName");
        assert!(results[1]["request"].is_object());
        assert_eq!(results[2]["error"], "unknown operation indexes/deleteIndex");
    }

    #[test]
    fn batch_invalid_invocations_file() {
        let dir = TempDir::new().unwrap();
        let invocations = write_temp_file(&dir, "invocations.json", r#"{"not": "an array"}"#);

        cmd()
            .args(["batch", FIXTURE, invocations.to_str().unwrap()])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("invalid invocations"));
    }
}

mod fields_command {
    use super::*;

    #[test]
    fn fields_text_output() {
        cmd()
            .args([
                "fields",
                FIXTURE,
                "-r",
                "authentications",
                "-o",
                "createAuthentication",
                "--select",
                "input=auth_basic",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains(r#"= "auth_basic""#))
            .stdout(predicate::str::contains("variant:username"))
            .stdout(predicate::str::contains("clientId").not());
    }

    #[test]
    fn fields_json_output() {
        let output = cmd()
            .args([
                "fields",
                FIXTURE,
                "-r",
                "authentications",
                "-o",
                "createAuthentication",
                "--select",
                "input=auth_apikey",
                "--json",
            ])
            .output()
            .unwrap();

        assert!(output.status.success());
        let rows = stdout_json(&output);
        let ids: Vec<&str> = rows
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["name", "type", "input", "key", "headerName", "in"]);

        let input = &rows[2];
        assert_eq!(input["kind"], "group");
        assert_eq!(input["selection"], "auth_apikey");
        assert_eq!(input["choices"].as_array().unwrap().len(), 3);

        let header = &rows[4];
        assert_eq!(header["channel"], "variant:name");
        assert_eq!(header["freeText"], true);
    }

    #[test]
    fn dynamic_options_without_loader_are_free_text() {
        let output = cmd()
            .args(["fields", FIXTURE, "-r", "indexes", "-o", "search", "--json"])
            .output()
            .unwrap();

        assert!(output.status.success());
        let rows = stdout_json(&output);
        assert_eq!(rows[0]["id"], "indexName");
        assert_eq!(rows[0]["channel"], "path");
        assert_eq!(rows[0]["freeText"], true);
    }
}

mod lint_command {
    use super::*;

    #[test]
    fn lint_fixture_passes() {
        cmd()
            .args(["lint", FIXTURE])
            .assert()
            .success()
            .stdout(predicate::str::contains("1 files checked, all passed"));
    }

    #[test]
    fn lint_reports_errors() {
        let dir = TempDir::new().unwrap();
        write_temp_file(&dir, "broken.json", "{ not json }");
        fs::copy(FIXTURE, dir.path().join("ingestion.json")).unwrap();

        cmd()
            .args(["lint", dir.path().to_str().unwrap()])
            .assert()
            .code(1)
            .stdout(predicate::str::contains("error[E001]"))
            .stdout(predicate::str::contains("1 passed, 1 failed (1 E001)"));
    }

    #[test]
    fn lint_warnings_fail_only_in_strict_mode() {
        let dir = TempDir::new().unwrap();
        let schema = write_temp_file(
            &dir,
            "schema.json",
            r#"{"properties": [
                {"name": "resource", "type": "enum", "options": [{"name": "A", "value": "a"}]},
                {"name": "operation", "type": "enum",
                 "options": [{"name": "B", "value": "b", "routing": {"request": {"url": "/b"}}}]},
                {"name": "sortOrder", "type": "enum"}
            ]}"#,
        );

        cmd()
            .args(["lint", schema.to_str().unwrap()])
            .assert()
            .success()
            .stdout(predicate::str::contains("warning[W002]"))
            .stdout(predicate::str::contains("all passed (1 W002)"));

        cmd()
            .args(["lint", schema.to_str().unwrap(), "--strict"])
            .assert()
            .code(1)
            .stdout(predicate::str::contains("0 passed, 1 failed (1 W002)"));
    }

    #[test]
    fn lint_json_format() {
        let output = cmd()
            .args(["lint", FIXTURE, "--format", "json"])
            .output()
            .unwrap();

        assert!(output.status.success());
        let result = stdout_json(&output);
        assert_eq!(result["files_checked"], 1);
        assert_eq!(result["results"][0]["status"], "ok");
        assert_eq!(result["counts"], serde_json::json!({}));
    }

    #[test]
    fn lint_missing_path() {
        cmd()
            .args(["lint", "/nonexistent/dir"])
            .assert()
            .code(2)
            .stderr(predicate::str::contains("path not found"));
    }
}

mod help_and_version {
    use super::*;

    #[test]
    fn help_flag() {
        cmd()
            .arg("--help")
            .assert()
            .success()
            .stdout(predicate::str::contains(
                "Resolve discriminated-union field schemas into HTTP requests",
            ));
    }

    #[test]
    fn version_flag() {
        cmd()
            .arg("--version")
            .assert()
            .success()
            .stdout(predicate::str::contains("oneof-routing"));
    }

    #[test]
    fn missing_operation_flag() {
        cmd()
            .args(["resolve", FIXTURE, "-r", "indexes"])
            .assert()
            .failure()
            .stderr(predicate::str::contains("--operation"));
    }
}

#[cfg(feature = "remote")]
mod remote {
    use super::*;

    #[test]
    fn resolve_from_url() {
        let mut server = mockito::Server::new();
        let body = fs::read_to_string(FIXTURE).unwrap();
        server
            .mock("GET", "/ingestion.json")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(body)
            .create();
        let url = format!("{}/ingestion.json", server.url());

        cmd()
            .args([
                "resolve",
                url.as_str(),
                "-r",
                "authentications",
                "-o",
                "getAuthentication",
                "--input",
                "authenticationID=a1",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("/1/authentications/a1"));
    }

    #[test]
    fn resolve_url_404() {
        let mut server = mockito::Server::new();
        server.mock("GET", "/missing.json").with_status(404).create();
        let url = format!("{}/missing.json", server.url());

        cmd()
            .args([
                "resolve",
                url.as_str(),
                "-r",
                "indexes",
                "-o",
                "search",
            ])
            .assert()
            .code(3)
            .stderr(predicate::str::contains("failed to fetch"));
    }

    #[test]
    fn fields_load_options() {
        let mut server = mockito::Server::new();
        let mock = server
            .mock("GET", "/1/indexes")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"items": [{"name": "products"}, {"name": "articles"}]}"#)
            .create();
        let url = server.url();

        let output = cmd()
            .args([
                "fields",
                FIXTURE,
                "-r",
                "indexes",
                "-o",
                "search",
                "--load-options",
                url.as_str(),
                "--json",
            ])
            .output()
            .unwrap();

        assert!(output.status.success());
        let rows = stdout_json(&output);
        assert_eq!(rows[0]["freeText"], false);
        assert_eq!(rows[0]["choices"][1]["value"], "articles");
        mock.assert();
    }

    #[test]
    fn fields_load_options_failure_degrades() {
        let mut server = mockito::Server::new();
        server.mock("GET", "/1/indexes").with_status(503).create();
        let url = server.url();

        let output = cmd()
            .args([
                "fields",
                FIXTURE,
                "-r",
                "indexes",
                "-o",
                "search",
                "--load-options",
                url.as_str(),
                "--json",
            ])
            .output()
            .unwrap();

        assert!(output.status.success());
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("Warning: options for 'indexName' unavailable"));
        assert_eq!(stdout_json(&output)[0]["freeText"], true);
    }
}
