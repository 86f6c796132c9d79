use optinfo_remarks::CONFIG_FILE_NAME;
use optinfo_remarks::CompileCommandResolver;
use optinfo_remarks::DATABASE_FILE_NAME;
use optinfo_remarks::NoticeLatch;
use optinfo_remarks::RemarksConfig;
use pretty_assertions::assert_eq;
use serde_json::json;
use std::path::Path;
use tempfile::TempDir;

fn database(dir: &Path, root: &Path, flag: &str) {
    std::fs::create_dir_all(dir).expect("create dir");
    std::fs::write(
        dir.join(DATABASE_FILE_NAME),
        json!([{
            "directory": root.to_string_lossy(),
            "file": "src/lib.cpp",
            "command": format!("c++ {flag} -c src/lib.cpp"),
        }])
        .to_string(),
    )
    .expect("write database");
}

#[test]
fn workspace_config_pointer_beats_root_database() {
    let temp = TempDir::new().expect("temp dir");
    let root = temp.path();
    let source = root.join("src/lib.cpp");
    database(root, root, "-DFROM_Y");
    database(&root.join("cmake/x"), root, "-DFROM_X");

    let resolve = || {
        let config = RemarksConfig::load_from_workspace(root).expect("config");
        CompileCommandResolver::new(&config, NoticeLatch::new())
            .resolve(&source, root)
            .found()
            .expect("compile command")
            .command
    };

    assert_eq!(resolve(), "c++ -DFROM_Y -c src/lib.cpp");

    std::fs::write(
        root.join(CONFIG_FILE_NAME),
        "compile_commands_dir = \"cmake/x\"\n",
    )
    .expect("write config");
    assert_eq!(resolve(), "c++ -DFROM_X -c src/lib.cpp");
}
