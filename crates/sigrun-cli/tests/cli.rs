//! End-to-end tests for the `sigrun` binary.

use assert_cmd::prelude::*;
use predicates::prelude::*;
use std::path::Path;
use std::process::Command;
use tempfile::TempDir;

fn sigrun() -> Command {
    let mut cmd = Command::new(env!("CARGO_BIN_EXE_sigrun"));
    cmd.env("RUST_LOG", "warn");
    cmd
}

fn stdout_line(output: &std::process::Output, prefix: &str) -> String {
    String::from_utf8_lossy(&output.stdout)
        .lines()
        .find_map(|line| line.strip_prefix(prefix).map(str::to_string))
        .unwrap_or_else(|| panic!("no line starting with {:?}", prefix))
}

fn init_chain(dir: &Path) -> String {
    let output = sigrun()
        .args(["init", "--name", "acme", "--image", "ghcr.io/acme/app"])
        .arg("--dir")
        .arg(dir)
        .args(["--passphrase", ""])
        .output()
        .expect("failed to run sigrun init");
    assert!(output.status.success(), "init should succeed");
    stdout_line(&output, "guid: ")
}

fn commit(dir: &Path, extra: &[&str]) -> Command {
    let mut cmd = sigrun();
    cmd.arg("commit")
        .arg("--dir")
        .arg(dir)
        .args(["--passphrase", "", "--new-passphrase", ""])
        .args(extra);
    cmd
}

fn sign(dir: &Path, sigs: &Path, image: &str) {
    sigrun()
        .args(["sign-image", image])
        .arg("--dir")
        .arg(dir)
        .arg("--out")
        .arg(sigs)
        .args(["--passphrase", ""])
        .assert()
        .success();
}

fn check(registry: &Path, sigs: &Path, image: &str) -> assert_cmd::assert::Assert {
    sigrun()
        .args(["check", image])
        .arg("--registry")
        .arg(registry)
        .arg("--signatures")
        .arg(sigs)
        .assert()
}

#[test]
fn test_keygen_writes_keypair() {
    let tmp = TempDir::new().unwrap();

    sigrun()
        .args(["keygen", "--passphrase", ""])
        .arg("--out")
        .arg(tmp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("key_id: sha256:"));

    assert!(tmp.path().join("private_key.pem").exists());
    assert!(tmp.path().join("public_key.pem").exists());

    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let metadata = std::fs::metadata(tmp.path().join("private_key.pem")).unwrap();
        assert_eq!(metadata.permissions().mode() & 0o777, 0o600);
    }

    // Refuses to overwrite without --force
    sigrun()
        .args(["keygen", "--passphrase", ""])
        .arg("--out")
        .arg(tmp.path())
        .assert()
        .failure()
        .stderr(predicate::str::contains("--force"));
}

#[test]
fn test_init_with_existing_keys() {
    let tmp = TempDir::new().unwrap();
    let keys = tmp.path().join("keys");
    let chain = tmp.path().join("chain");

    sigrun()
        .args(["keygen", "--passphrase", ""])
        .arg("--out")
        .arg(&keys)
        .assert()
        .success();

    sigrun()
        .args(["init", "--name", "acme", "--image", "ghcr.io/acme/app"])
        .arg("--dir")
        .arg(&chain)
        .arg("--public-key")
        .arg(keys.join("public_key.pem"))
        .arg("--private-key")
        .arg(keys.join("private_key.pem"))
        .assert()
        .success()
        .stdout(predicate::str::contains("guid: "));

    let current = std::fs::read_to_string(chain.join("sigrun-repo.json")).unwrap();
    let public_key = std::fs::read_to_string(keys.join("public_key.pem")).unwrap();
    let record: serde_json::Value = serde_json::from_str(&current).unwrap();
    assert_eq!(record["Mode"], "keypair");
    assert_eq!(record["PublicKey"], public_key.as_str());

    let archived = std::fs::read_to_string(chain.join(".sigrun/0.json")).unwrap();
    assert!(!archived.contains("PRIVATE KEY"));
}

#[test]
fn test_init_twice_fails() {
    let tmp = TempDir::new().unwrap();
    init_chain(tmp.path());

    sigrun()
        .args(["init", "--name", "acme", "--passphrase", ""])
        .arg("--dir")
        .arg(tmp.path())
        .assert()
        .code(3);
}

#[test]
fn test_commit_verify_and_guid() {
    let tmp = TempDir::new().unwrap();
    let guid = init_chain(tmp.path());

    commit(tmp.path(), &["--add-image", "ghcr.io/acme/worker"])
        .assert()
        .success()
        .stdout(predicate::str::contains("Committed record 1"));
    commit(tmp.path(), &["--rotate-key"]).assert().success();

    let output = sigrun()
        .arg("verify")
        .arg(tmp.path())
        .output()
        .expect("failed to run sigrun verify");
    assert!(output.status.success());
    assert_eq!(stdout_line(&output, "guid: "), guid);
    assert_eq!(stdout_line(&output, "head: "), "2");

    sigrun()
        .args(["verify", "--from", "1"])
        .arg(tmp.path())
        .assert()
        .success()
        .stdout(predicate::str::contains("verified from 1 to 2"));

    sigrun()
        .arg("guid")
        .arg(tmp.path())
        .assert()
        .success()
        .stdout(format!("{}\n", guid));
}

#[test]
fn test_commit_without_changes_is_refused() {
    let tmp = TempDir::new().unwrap();
    init_chain(tmp.path());

    commit(tmp.path(), &[])
        .assert()
        .code(3)
        .stderr(predicate::str::contains("config has not changed"));
}

#[test]
fn test_tampered_archive_fails_verification() {
    let tmp = TempDir::new().unwrap();
    init_chain(tmp.path());
    commit(tmp.path(), &["--add-image", "ghcr.io/acme/worker"])
        .assert()
        .success();

    let path = tmp.path().join(".sigrun/1.json");
    let tampered = std::fs::read_to_string(&path)
        .unwrap()
        .replace("ghcr.io/acme/worker", "ghcr.io/evil/worker");
    std::fs::write(&path, tampered).unwrap();

    sigrun().arg("verify").arg(tmp.path()).assert().code(4);
}

#[test]
fn test_sign_image_refuses_unlisted_image() {
    let tmp = TempDir::new().unwrap();
    let chain = tmp.path().join("chain");
    init_chain(&chain);

    sigrun()
        .args(["sign-image", "ghcr.io/other/app:v1", "--passphrase", ""])
        .arg("--dir")
        .arg(&chain)
        .arg("--out")
        .arg(tmp.path().join("sigs"))
        .assert()
        .failure()
        .stderr(predicate::str::contains("not listed"));
}

#[test]
fn test_registry_and_admission_flow() {
    let tmp = TempDir::new().unwrap();
    let chain = tmp.path().join("chain");
    let sigs = tmp.path().join("sigs");
    let registry = tmp.path().join("registry.json");

    let guid = init_chain(&chain);
    sign(&chain, &sigs, "ghcr.io/acme/app:v1");

    sigrun()
        .arg("registry")
        .arg("--file")
        .arg(&registry)
        .arg("add")
        .arg(&chain)
        .assert()
        .success()
        .stdout(predicate::str::contains(guid.as_str()));

    // Signed image passes, unsigned tag of a claimed repository does not
    check(&registry, &sigs, "ghcr.io/acme/app:v1")
        .success()
        .stdout(predicate::str::contains("allowed"));
    check(&registry, &sigs, "ghcr.io/acme/app:v2")
        .code(4)
        .stdout(predicate::str::contains("denied"));

    // Images no chain claims are admitted
    check(&registry, &sigs, "nginx:1.25").success();

    // After rotation the registry still pins the old key until updated
    commit(&chain, &["--rotate-key"]).assert().success();
    sign(&chain, &sigs, "ghcr.io/acme/app:v1");
    check(&registry, &sigs, "ghcr.io/acme/app:v1").code(4);

    sigrun()
        .arg("registry")
        .arg("--file")
        .arg(&registry)
        .args(["update", guid.as_str()])
        .assert()
        .success()
        .stdout(predicate::str::contains("to record 1"));
    check(&registry, &sigs, "ghcr.io/acme/app:v1").success();

    let output = sigrun()
        .arg("registry")
        .arg("--file")
        .arg(&registry)
        .args(["list", "--json"])
        .output()
        .expect("failed to run sigrun registry list");
    assert!(output.status.success());
    let snapshot: serde_json::Value = serde_json::from_slice(&output.stdout).unwrap();
    assert_eq!(
        snapshot["guidToRepo"][guid.as_str()]["verificationInfo"]["ChainNo"],
        1
    );
    assert_eq!(
        snapshot["imageToGuids"]["ghcr.io/acme/app"][0],
        guid.as_str()
    );

    sigrun()
        .arg("registry")
        .arg("--file")
        .arg(&registry)
        .args(["remove", guid.as_str()])
        .assert()
        .success();
    check(&registry, &sigs, "ghcr.io/acme/app:v2").success();
}

#[test]
fn test_check_without_registry_fails() {
    let tmp = TempDir::new().unwrap();

    sigrun()
        .args(["check", "ghcr.io/acme/app:v1"])
        .arg("--registry")
        .arg(tmp.path().join("missing.json"))
        .assert()
        .code(5);
}
