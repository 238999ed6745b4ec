// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! End-to-end engine lifecycle scenarios, driven through real `sh`
//! subprocesses via `ShellRunner`.

use statekit_core::{Engine, EngineConfig, RunOutcome};

fn engine_in(dir: &std::path::Path) -> Engine {
    let config = EngineConfig {
        state_dir: dir.join("state"),
        workdir: dir.join("work"),
    };
    Engine::open(config).expect("open engine")
}

// ── 1. a fresh engine's first run creates a root layer ──────────────────

#[tokio::test]
async fn fresh_run_creates_root_layer() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine_in(dir.path());

    let outcome = engine.run("echo hi > greeting.txt").await.unwrap();
    assert!(matches!(outcome, RunOutcome::Created { .. }));
    assert_eq!(engine.history().len(), 1);
    assert!(engine.history()[0].parent.is_none());
}

// ── 2. checking out an earlier layer then replaying the same later
//      instruction is a cache hit, and head does not move past it twice ──

#[tokio::test]
async fn checkout_then_rerun_hits_cache() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine_in(dir.path());

    let RunOutcome::Created { hash: first } =
        engine.run("echo one > a.txt").await.unwrap()
    else {
        panic!("expected a created layer");
    };
    let RunOutcome::Created { hash: second } =
        engine.run("echo two > b.txt").await.unwrap()
    else {
        panic!("expected a created layer");
    };

    engine.checkout(&first.to_hex()).unwrap();
    assert_eq!(engine.head(), Some(first));

    let replay = engine.run("echo two > b.txt").await.unwrap();
    assert_eq!(replay, RunOutcome::Cached { hash: second });
    assert_eq!(engine.history().len(), 2, "no duplicate layer recorded");
}

// ── 3. a failing command records no layer and leaves head untouched ─────

#[tokio::test]
async fn failing_command_records_no_layer() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine_in(dir.path());

    engine.run("echo one > a.txt").await.unwrap();
    let head_before = engine.head();

    let err = engine.run("exit 3").await.unwrap_err();
    assert!(matches!(
        err,
        statekit_core::EngineError::CommandFailed { code: 3, .. }
    ));
    assert_eq!(engine.head(), head_before);
    assert_eq!(engine.history().len(), 1);
}

// ── 4. checkout restores files deleted by a later instruction ───────────

#[tokio::test]
async fn checkout_restores_deleted_files() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine_in(dir.path());

    let RunOutcome::Created { hash: root } =
        engine.run("echo keep > keep.txt").await.unwrap()
    else {
        panic!("expected a created layer");
    };
    engine
        .run("rm keep.txt && echo gone > gone.txt")
        .await
        .unwrap();
    assert!(!engine.config().workdir.join("keep.txt").exists());

    engine.checkout(&root.to_hex()).unwrap();
    assert!(engine.config().workdir.join("keep.txt").exists());
    assert!(!engine.config().workdir.join("gone.txt").exists());
}

// ── 5. tagging head then checking out the tag matches a direct checkout ─

#[tokio::test]
async fn tag_then_checkout_equals_hash_checkout() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine_in(dir.path());

    let RunOutcome::Created { hash } = engine.run("echo hi > f.txt").await.unwrap() else {
        panic!("expected a created layer");
    };
    engine.tag("stable", None).unwrap();

    engine.run("echo more > g.txt").await.unwrap();
    engine.checkout("stable").unwrap();

    assert_eq!(engine.head(), Some(hash));
    assert!(!engine.config().workdir.join("g.txt").exists());
}

// ── 6. rebuild after manual workdir corruption reproduces head state ────

#[tokio::test]
async fn rebuild_recovers_from_corrupted_workdir() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine_in(dir.path());

    engine.run("echo one > a.txt").await.unwrap();
    engine.run("echo two > b.txt").await.unwrap();

    std::fs::write(engine.config().workdir.join("a.txt"), b"tampered").unwrap();
    std::fs::remove_file(engine.config().workdir.join("b.txt")).unwrap();

    let count = engine.rebuild().unwrap();
    assert_eq!(count, 2);
    assert_eq!(
        std::fs::read(engine.config().workdir.join("a.txt")).unwrap(),
        b"one\n"
    );
    assert_eq!(
        std::fs::read(engine.config().workdir.join("b.txt")).unwrap(),
        b"two\n"
    );
}

// ── 7. status is clean right after a run and dirty after a manual edit ──

#[tokio::test]
async fn status_reflects_manual_edits() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine_in(dir.path());

    engine.run("echo one > a.txt").await.unwrap();
    assert!(engine.status().unwrap().is_clean());

    std::fs::write(engine.config().workdir.join("a.txt"), b"edited").unwrap();
    let status = engine.status().unwrap();
    assert!(!status.is_clean());
    assert_eq!(status.modified.len(), 1);
}

// ── 8b. diff between two refs on different branches compares their own
//       states, not whichever one happens to be on the current head chain ──

#[tokio::test]
async fn diff_compares_dangling_branch_by_its_own_ancestry() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine_in(dir.path());

    let RunOutcome::Created { hash: layer1 } =
        engine.run("echo one > a.txt").await.unwrap()
    else {
        panic!("expected a created layer");
    };
    let RunOutcome::Created { hash: layer2 } =
        engine.run("echo two > b.txt").await.unwrap()
    else {
        panic!("expected a created layer");
    };

    // Rewind to layer1 and branch off in a different direction, leaving
    // layer2 dangling: still addressable by hash, but no longer on head's
    // chain.
    engine.checkout(&layer1.to_hex()).unwrap();
    let RunOutcome::Created { hash: layer3 } =
        engine.run("echo three > c.txt").await.unwrap()
    else {
        panic!("expected a created layer");
    };
    assert_ne!(layer2, layer3);

    let diff = engine
        .diff(Some(&layer2.to_hex()), Some(&layer3.to_hex()))
        .unwrap();
    assert!(
        !diff.is_clean(),
        "layer2 and layer3 diverge at b.txt/c.txt and must not compare equal"
    );
    assert!(diff.deleted.iter().any(|p| p.as_str() == "b.txt"));
    assert!(diff.added.iter().any(|p| p.as_str() == "c.txt"));
}

// ── 8. a no-op instruction produces Empty and advances no layer ─────────

#[tokio::test]
async fn noop_instruction_is_empty() {
    let dir = tempfile::tempdir().unwrap();
    let mut engine = engine_in(dir.path());

    engine.run("echo one > a.txt").await.unwrap();
    let head = engine.head();

    let outcome = engine.run("true").await.unwrap();
    assert_eq!(outcome, RunOutcome::Empty { head });
    assert_eq!(engine.history().len(), 1);
}
