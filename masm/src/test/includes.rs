use crate::error::{ErrorKind, IncludeError};
use crate::include::expand_includes;
use crate::AssembleOptions;
use std::collections::HashMap;
use std::path::PathBuf;

fn options_with_files(files: Vec<(&str, &str)>) -> AssembleOptions {
    let map: HashMap<String, String> = files
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    AssembleOptions {
        base_dir: Some(PathBuf::from("/proj")),
        source_name: Some("main.s".to_string()),
        include_resolver: Some(Box::new(move |path| {
            map.get(&path.to_string_lossy().into_owned())
                .cloned()
                .ok_or_else(|| {
                    std::io::Error::new(std::io::ErrorKind::NotFound, "no such file")
                })
        })),
        ..AssembleOptions::default()
    }
}

#[test]
fn include_splices_lines() {
    let options = options_with_files(vec![("/proj/lib.s", "li $v0, 10\nsyscall")]);
    let source = ".text\n.include \"lib.s\"\nnop";
    let (lines, origins) = expand_includes(source, &options).unwrap();

    assert_eq!(lines, vec![".text", "li $v0, 10", "syscall", "nop"]);
    assert_eq!(origins.get(1).file.as_ref(), "main.s");
    assert_eq!(origins.get(1).line, 1);
    assert_eq!(origins.get(2).file.as_ref(), "/proj/lib.s");
    assert_eq!(origins.get(2).line, 1);
    assert_eq!(origins.get(3).line, 2);
    assert_eq!(origins.get(4).file.as_ref(), "main.s");
    assert_eq!(origins.get(4).line, 3);
}

#[test]
fn nested_include_resolves_relative_to_including_file() {
    let options = options_with_files(vec![
        ("/proj/sub/a.s", ".include \"b.s\""),
        ("/proj/sub/b.s", "nop"),
    ]);
    let source = ".include \"sub/a.s\"";
    let (lines, origins) = expand_includes(source, &options).unwrap();
    assert_eq!(lines, vec!["nop"]);
    assert_eq!(origins.get(1).file.as_ref(), "/proj/sub/b.s");
}

#[test]
fn recursive_include_is_detected() {
    let options = options_with_files(vec![("/proj/self.s", ".include \"self.s\"")]);
    let err = expand_includes(".include \"self.s\"", &options).unwrap_err();
    match err.kind {
        ErrorKind::Include(IncludeError::Recursive { .. }) => {}
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn missing_resolver_is_an_error() {
    let options = AssembleOptions::default();
    let err = expand_includes(".include \"lib.s\"", &options).unwrap_err();
    match err.kind {
        ErrorKind::Include(IncludeError::Unavailable { .. }) => {}
        other => panic!("unexpected error {:?}", other),
    }
}

#[test]
fn resolver_failure_is_reported() {
    let options = options_with_files(vec![]);
    let err = expand_includes(".include \"gone.s\"", &options).unwrap_err();
    match err.kind {
        ErrorKind::Include(IncludeError::Resolver { ref path, .. }) => {
            assert_eq!(path, "/proj/gone.s");
        }
        other => panic!("unexpected error {:?}", other),
    }
}
