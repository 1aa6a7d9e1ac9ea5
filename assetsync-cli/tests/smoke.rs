use assert_cmd::prelude::*;
use assert_fs::prelude::*;
use predicates::prelude::*;
use rand::{rngs::StdRng, Rng, SeedableRng};
use std::process::Command;

fn random(bytes: usize, seed: u64) -> Vec<u8> {
    let mut rng = StdRng::seed_from_u64(seed);
    (0..bytes).map(|_| rng.gen()).collect()
}

fn assetsync(td: &assert_fs::TempDir) -> Command {
    let mut cmd = Command::cargo_bin("assetsync").unwrap();
    cmd.current_dir(td.path()).env_remove("RUST_LOG").args(["--data-dir", "data"]);
    cmd
}

#[test]
fn publish_sync_audit_resync() {
    let td = assert_fs::TempDir::new().unwrap();
    let v1 = td.child("v1");
    let v2 = td.child("v2");
    let a1 = random(64 * 1024, 1);
    let mut a2 = a1.clone();
    a2[1000] ^= 0xFF;
    a2.extend_from_slice(b"appended");
    v1.child("a.bin").write_binary(&a1).unwrap();
    v1.child("res/b.txt").write_str("unchanged").unwrap();
    v2.child("a.bin").write_binary(&a2).unwrap();
    v2.child("res/b.txt").write_str("unchanged").unwrap();

    // v1 mirror, first sync fetches everything
    assetsync(&td)
        .args(["publish", "v1", "mirror1", "--only", "any"])
        .assert()
        .success();
    assetsync(&td)
        .args(["sync", "--mirror", "mirror1", "--platform", "*"])
        .assert()
        .success()
        .stdout(predicate::str::contains("fetched    a.bin"))
        .stdout(predicate::str::contains("fetched    res/b.txt"));
    assert_eq!(std::fs::read(td.child("data/a.bin").path()).unwrap(), a1);

    // v2 mirror with patches from v1
    assetsync(&td)
        .args(["publish", "v2", "mirror2", "--previous", "v1", "--only", "any"])
        .assert()
        .success();
    assetsync(&td)
        .args(["audit", "--mirror", "mirror2", "--platform", "*"])
        .assert()
        .success()
        .stdout(predicate::str::contains("PATCHABLE  a.bin"))
        .stdout(predicate::str::contains("NEEDS SYNC"));
    assetsync(&td)
        .args(["sync", "--mirror", "mirror2", "--platform", "*"])
        .assert()
        .success()
        .stdout(predicate::str::contains("patched    a.bin"))
        .stdout(predicate::str::contains("up-to-date res/b.txt"));
    assert_eq!(std::fs::read(td.child("data/a.bin").path()).unwrap(), a2);

    // Nothing left to do
    assetsync(&td)
        .args(["audit", "--mirror", "mirror2", "--platform", "*"])
        .assert()
        .success()
        .stdout(predicate::str::contains("OK"))
        .stdout(predicate::str::contains("NEEDS SYNC").not());
    assetsync(&td)
        .args(["sync", "--mirror", "mirror2", "--platform", "*"])
        .assert()
        .success()
        .stdout(predicate::str::contains("patched").not())
        .stdout(predicate::str::contains("fetched").not());
}

#[test]
fn sync_reports_failures_with_nonzero_exit() {
    let td = assert_fs::TempDir::new().unwrap();
    td.child("src/a.bin").write_binary(&random(4096, 2)).unwrap();
    td.child("src/b.bin").write_binary(&random(4096, 3)).unwrap();
    assetsync(&td).args(["publish", "src", "mirror", "--only", "any"]).assert().success();

    // Remove one object from the mirror.
    let manifest: serde_json::Value =
        serde_json::from_slice(&std::fs::read(td.child("mirror/patchmanifest.txt").path()).unwrap())
            .unwrap();
    let object = manifest["b.bin"]["dl"].as_str().unwrap();
    std::fs::remove_file(td.child("mirror").child(object).path()).unwrap();

    assetsync(&td)
        .args(["sync", "--mirror", "mirror", "--platform", "any"])
        .assert()
        .failure()
        .stdout(predicate::str::contains("fetched    a.bin"))
        .stdout(predicate::str::contains("FAILED     b.bin: transport error"));
    td.child("data/b.bin").assert(predicate::path::missing());
}

#[test]
fn diff_and_patch_commands() {
    let td = assert_fs::TempDir::new().unwrap();
    let old = random(32 * 1024, 4);
    let mut new = old.clone();
    new.truncate(20_000);
    new.extend_from_slice(&random(500, 5));
    td.child("old.bin").write_binary(&old).unwrap();
    td.child("new.bin").write_binary(&new).unwrap();

    assetsync(&td).args(["diff", "old.bin", "new.bin", "p.bsdiff"]).assert().success();
    td.child("p.bsdiff").assert(predicate::path::exists());

    assetsync(&td)
        .args(["patch", "old.bin", "p.bsdiff", "wrong.bin", "--expect", "00"])
        .assert()
        .failure();
    td.child("wrong.bin").assert(predicate::path::missing());

    assetsync(&td).args(["patch", "old.bin", "p.bsdiff", "out.bin"]).assert().success();
    assert_eq!(std::fs::read(td.child("out.bin").path()).unwrap(), new);
}

#[test]
fn config_and_dir() {
    let td = assert_fs::TempDir::new().unwrap();
    assetsync(&td)
        .arg("config")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"codec\": \"bzip2\""))
        .stdout(predicate::str::contains("\"hash\": \"sha1\""));
    td.child("data/assetsync.json").assert(predicate::path::exists());
    assetsync(&td).arg("dir").assert().success().stdout(predicate::str::contains("data"));
}

#[test]
fn sync_without_mirror_fails() {
    let td = assert_fs::TempDir::new().unwrap();
    assetsync(&td)
        .arg("sync")
        .assert()
        .failure()
        .stderr(predicate::str::contains("no mirror configured"));
}
