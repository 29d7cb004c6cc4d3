use agent_foreman::AppError;

#[test]
fn display_prefixes_the_error_kind() {
    let cases = [
        (AppError::NotFound("task t9".into()), "not found: task t9"),
        (AppError::AlreadyExists("session t1".into()), "already exists: session t1"),
        (
            AppError::ResourceExhausted("no free port".into()),
            "resource exhausted: no free port",
        ),
        (AppError::Vcs("bad ref".into()), "vcs: bad ref"),
        (AppError::Multiplexer("no server".into()), "multiplexer: no server"),
        (AppError::Cancelled("stopped".into()), "cancelled: stopped"),
        (
            AppError::InvalidTransition("paused".into()),
            "invalid transition: paused",
        ),
        (AppError::TaskStore("locked".into()), "task store: locked"),
        (AppError::Config("bad".into()), "config: bad"),
        (AppError::Io("eof".into()), "io: eof"),
    ];

    for (err, expected) in cases {
        assert_eq!(err.to_string(), expected);
    }
}

#[test]
fn teardown_lists_every_failed_step() {
    let err = AppError::Teardown(vec![
        AppError::Multiplexer("kill-session failed".into()),
        AppError::Vcs("worktree is dirty".into()),
    ]);

    assert_eq!(
        err.to_string(),
        "teardown: 2 step(s) failed; multiplexer: kill-session failed; vcs: worktree is dirty"
    );
    assert!(err.involves_vcs());
}

#[test]
fn involves_vcs_only_for_vcs_failures() {
    assert!(AppError::Vcs("x".into()).involves_vcs());
    assert!(!AppError::Multiplexer("x".into()).involves_vcs());
    assert!(!AppError::Teardown(vec![AppError::Multiplexer("x".into())]).involves_vcs());
}

#[test]
fn conversions_map_to_matching_kinds() {
    let toml_err = toml::from_str::<toml::Value>("= nope").unwrap_err();
    assert!(matches!(AppError::from(toml_err), AppError::Config(_)));

    let json_err = serde_json::from_str::<Vec<u8>>("{").unwrap_err();
    assert!(matches!(AppError::from(json_err), AppError::TaskStore(_)));

    let io_err = std::io::Error::new(std::io::ErrorKind::Other, "disk full");
    assert!(matches!(AppError::from(io_err), AppError::Io(ref msg) if msg == "disk full"));
}
