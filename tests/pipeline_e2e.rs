//! Whole command lines run through a session over the demo backend.

use nsh::catalog::demo_session;
use nsh::error::NshError;
use nsh::namespace::EditState;
use nsh::output::{Output, Table};
use nsh::remote::memory::InMemoryRemote;
use nsh::session::Session;
use nsh::task::TaskStatus;
use nsh::value::Value;
use serde_json::json;
use std::collections::BTreeSet;
use std::sync::Arc;

fn setup() -> (Session, Arc<InMemoryRemote>) {
    demo_session().unwrap()
}

fn run(session: &mut Session, line: &str) -> Result<Output, NshError> {
    Ok(session.eval(line)?.pop().unwrap_or_default())
}

fn table(output: Output) -> Table {
    match output {
        Output::Table(table) => table,
        other => panic!("expected a table, got {other:?}"),
    }
}

fn usernames(table: &Table) -> BTreeSet<String> {
    table
        .rows
        .iter()
        .map(|row| row["username"].as_str().unwrap().to_string())
        .collect()
}

#[test]
fn up_twice_from_system_ui_returns_to_root() {
    let (mut session, _) = setup();
    run(&mut session, "system/ui").unwrap();
    assert_eq!(session.path_string(), "/system/ui");
    run(&mut session, "..").unwrap();
    run(&mut session, "..").unwrap();
    assert_eq!(session.path_string(), "/");
}

#[test]
fn dotdot_inside_a_path_is_resolved_in_place() {
    let (mut a, _) = setup();
    let (mut b, _) = setup();
    a.navigate("account/user/../group").unwrap();
    b.navigate("account/group").unwrap();
    assert_eq!(a.path_string(), b.path_string());
}

#[test]
fn exclude_and_search_partition_the_rows() {
    let (mut session, _) = setup();
    let all = usernames(&table(run(&mut session, "account user show").unwrap()));
    let kept = usernames(&table(
        run(&mut session, "account user show | search shell==/bin/sh").unwrap(),
    ));
    let dropped = usernames(&table(
        run(&mut session, "account user show | exclude shell==/bin/sh").unwrap(),
    ));

    assert!(kept.is_disjoint(&dropped));
    assert_eq!(&kept | &dropped, all);
    assert_eq!(kept, BTreeSet::from(["root".to_string()]));
}

#[test]
fn limit_bounds_every_later_stage() {
    let (mut session, _) = setup();
    for line in [
        "account user show | limit 2 | sort -uid",
        "account user show | limit 2 | exclude username==root",
        "account user show | limit 2 | select username",
    ] {
        assert!(table(run(&mut session, line).unwrap()).len() <= 2, "{line}");
    }
}

#[test]
fn must_be_last_stage_fails_before_fetching() {
    let (mut session, remote) = setup();
    remote.clear_calls();
    let err = run(&mut session, "account user show | less | limit 1").unwrap_err();
    assert!(matches!(err, NshError::Composition(_)));
    assert!(remote.calls().is_empty());
}

#[test]
fn search_then_limit_over_ten_rows() {
    let (mut session, remote) = setup();
    remote.seed(
        "account.user",
        (0..7).map(|i| json!({"id": 10 + i, "username": format!("user{i}"), "uid": 2000 + i})),
    );
    let all = table(run(&mut session, "account user show").unwrap());
    assert_eq!(all.len(), 10);

    let rows = table(
        run(&mut session, "account user show | search username==root | limit 1").unwrap(),
    )
    .rows;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["username"], json!("root"));
}

#[test]
fn create_without_required_property_makes_no_call() {
    let (mut session, remote) = setup();
    remote.clear_calls();
    let err = run(&mut session, "account user create carol").unwrap_err();
    match err {
        NshError::MissingRequiredProperty(missing) => assert_eq!(missing, vec!["uid"]),
        other => panic!("unexpected error: {other}"),
    }
    assert!(remote.calls().is_empty());
}

#[test]
fn failed_save_keeps_the_edits() {
    let (mut session, remote) = setup();
    run(&mut session, "account user show").unwrap();
    run(&mut session, "account user alice set full_name=\"Alice L\"").unwrap();

    remote.fail_next("account.user.update", "directory service offline");
    let Output::Task(promise) = run(&mut session, "account user alice save").unwrap() else {
        panic!("save should return a task");
    };
    assert_eq!(promise.record().status, TaskStatus::Failed);

    let users = session.root().child("account").unwrap().child("user").unwrap();
    let alice = users.as_collection().unwrap().find("alice").unwrap();
    assert_eq!(alice.edit_state(), EditState::Dirty);
    assert!(alice.last_error().unwrap().contains("offline"));

    let value = run(&mut session, "account user alice get full_name").unwrap();
    assert!(matches!(value, Output::Value(Value::String(ref s)) if s == "Alice L"));
}

#[test]
fn create_then_blocking_delete_round_trip() {
    let (mut session, remote) = setup();
    run(&mut session, "setopt tasks_blocking=yes").unwrap();
    run(&mut session, "account user create carol uid=1003 shell=/bin/bash").unwrap();
    assert!(remote
        .rows("account.user")
        .iter()
        .any(|row| row["username"] == json!("carol")));

    run(&mut session, "account user delete carol delete_home=yes").unwrap();
    assert!(!remote
        .rows("account.user")
        .iter()
        .any(|row| row["username"] == json!("carol")));
}

#[test]
fn revert_discards_unsaved_edits() {
    let (mut session, _) = setup();
    run(&mut session, "account user show").unwrap();
    run(&mut session, "cd account/user/bob").unwrap();
    run(&mut session, "set shell=/usr/bin/zsh").unwrap();
    run(&mut session, "revert").unwrap();
    let Output::Value(shell) = run(&mut session, "get shell").unwrap() else {
        panic!("get should return a value");
    };
    assert_eq!(shell.to_string(), "/bin/bash");
}

#[test]
fn share_feed_children_narrow_by_type() {
    let (mut session, _) = setup();
    let nfs = table(run(&mut session, "share nfs show").unwrap());
    let names: BTreeSet<&str> = nfs.rows.iter().filter_map(|r| r["name"].as_str()).collect();
    assert_eq!(names, BTreeSet::from(["backup", "media"]));

    let all = table(run(&mut session, "share show").unwrap());
    assert_eq!(all.len(), 3);
}

#[test]
fn setopt_rejects_bad_numbers_and_keeps_the_old_value() {
    let (mut session, _) = setup();
    let err = run(&mut session, "setopt timeout=abc").unwrap_err();
    assert!(matches!(err, NshError::TypeCoercion { .. }));
    assert_eq!(session.variables().number("timeout"), Some(10));
}

#[test]
fn source_stops_at_first_failure() {
    let (mut session, _) = setup();
    let dir = tempfile::tempdir().unwrap();
    let script = dir.path().join("setup.nsh");
    std::fs::write(&script, "setopt greeting=hi\nnosuchthing\nsetopt after=yes\n").unwrap();

    let err = session.source(&script).unwrap_err();
    assert!(matches!(err, NshError::NotFound { .. }));
    assert_eq!(session.variables().text("greeting").as_deref(), Some("hi"));
    assert!(session.variables().get("after").is_none());
}

#[test]
fn variables_interpolate_into_later_statements() {
    let (mut session, _) = setup();
    run(&mut session, "setopt who=alice").unwrap();
    let found = run(&mut session, "account user show | find username==${who}").unwrap();
    assert!(matches!(found, Output::Value(Value::String(ref s)) if s == "alice"));

    let err = run(&mut session, "echo ${nobody}").unwrap_err();
    assert!(matches!(err, NshError::NotFound { .. }));
}

#[test]
fn age_filters_over_task_history() {
    let (mut session, _) = setup();
    run(&mut session, "setopt tasks_blocking=yes").unwrap();
    run(&mut session, "account user create carol uid=1003").unwrap();

    let recent = table(run(&mut session, "task show | newer_than 1:00").unwrap());
    assert!(!recent.is_empty());
    let old = table(run(&mut session, "task show | older_than 1:00").unwrap());
    assert!(old.is_empty());

    for line in [
        "task show | older_than 1:99",
        "task show | newer_than abc",
        "task show | older_than 9999999999:00",
    ] {
        let err = run(&mut session, line).unwrap_err();
        assert!(matches!(err, NshError::TypeCoercion { .. }), "{line}");
    }
}

#[test]
fn user_keys_are_edited_under_the_user() {
    let (mut session, remote) = setup();
    run(&mut session, "account user show").unwrap();
    run(&mut session, "cd account/user/alice/sshkey").unwrap();
    assert_eq!(session.path_string(), "/account/user/alice/sshkey");

    let keys = table(run(&mut session, "show | sort name | select name").unwrap());
    let names: Vec<&str> = keys.rows.iter().filter_map(|r| r["name"].as_str()).collect();
    assert_eq!(names, vec!["ci", "laptop"]);

    run(&mut session, "setopt tasks_blocking=yes").unwrap();
    run(&mut session, "ci set comment=\"build agent\"").unwrap();
    run(&mut session, "ci save").unwrap();

    let stored = remote.rows("account.user");
    let alice = stored.iter().find(|u| u["username"] == json!("alice")).unwrap();
    assert_eq!(alice["ssh_keys"][1]["comment"], json!("build agent"));
}
