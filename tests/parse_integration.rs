use arcrelay::parse;

#[test]
fn test_split_remote_with_prefix() {
    let (prefix, path) = parse::split_remote("gd:games/archive");
    assert_eq!(prefix, "gd");
    assert_eq!(path, "games/archive");
}

#[test]
fn test_split_remote_local_path() {
    let (prefix, path) = parse::split_remote("scratch/tmp");
    assert_eq!(prefix, "");
    assert_eq!(path, "/scratch/tmp");
}

#[test]
fn test_join_remote_roundtrip() {
    assert_eq!(parse::join_remote("gd:games", "sub/a.part1.rar"), "gd:games/sub/a.part1.rar");
    assert_eq!(parse::join_remote("gd:games/", "/sub/a.rar"), "gd:games/sub/a.rar");
}

#[test]
fn test_parse_remote_spec_rejects_empty() {
    assert!(parse::parse_remote_spec("").is_err());
    assert!(parse::parse_remote_spec("gd:data").is_ok());
}
