use std::path::Path;
use std::process::Output;

/// Runs the kasp binary on the datastore in `dir`.
#[track_caller]
pub fn kasp(dir: &Path, args: &[&str]) -> Output {
    test_bin::get_test_bin("kasp")
        .current_dir(dir)
        .args(["-c", "kasp.json"])
        .args(args)
        .output()
        .unwrap()
}

/// Runs the kasp binary and checks that it succeeded.
///
/// Returns stdout.
#[track_caller]
pub fn kasp_ok(dir: &Path, args: &[&str]) -> String {
    let out = kasp(dir, args);
    assert_eq!(
        out.status.code(),
        Some(0),
        "kasp {} failed: {}",
        args.join(" "),
        String::from_utf8_lossy(&out.stderr)
    );
    String::from_utf8(out.stdout).unwrap()
}
