use std::ffi::OsString;

use local_registry::{AppError, StartOptions};

#[test]
fn registry_args_disable_browser_and_clear_state() {
    let args = StartOptions::new("demo:local-registry").registry_args();
    let expected: Vec<OsString> = ["run", "demo:local-registry", "--location", "none", "--clear", "true"]
        .into_iter()
        .map(OsString::from)
        .collect();
    assert_eq!(args, expected);
}

#[test]
fn storage_override_is_appended() {
    let args = StartOptions::new("demo:local-registry")
        .with_storage("./tmp/local-registry/storage")
        .registry_args();
    assert_eq!(args[args.len() - 2], OsString::from("--storage"));
    assert_eq!(
        args[args.len() - 1],
        OsString::from("./tmp/local-registry/storage")
    );
}

#[test]
fn empty_target_is_usage_error() {
    for target in ["", "   "] {
        let err = StartOptions::new(target).validate().expect_err("must fail");
        assert!(matches!(err, AppError::Usage(_)), "got {err:?}");
    }
}

#[test]
fn builder_sets_verbose() {
    let options = StartOptions::new("t").with_verbose(true);
    assert!(options.verbose);
    assert!(options.storage.is_none());
    assert!(options.validate().is_ok());
}
