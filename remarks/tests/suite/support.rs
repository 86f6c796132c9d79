#![cfg(unix)]

use std::os::unix::fs::PermissionsExt;
use std::path::Path;
use std::path::PathBuf;

/// `int add(...)` on line 1 is inlined into `twice` on line 2.
pub const TWO_LINE_SOURCE: &str = "\
int add(int a, int b) { return a + b; }
int twice(int x) { return add(x, x); }
";

pub const CANNED_RECORD: &str = "\
--- !Passed
Pass:            inline
Name:            Inlined
DebugLoc:        { File: code.c, Line: 2, Column: 27 }
Function:        twice
Args:
  - Callee:          add
    DebugLoc:        { File: code.c, Line: 1, Column: 0 }
  - String:          ' inlined into '
  - Caller:          twice
    DebugLoc:        { File: code.c, Line: 2, Column: 0 }
...
--- !Missed
Pass:            inline
Name:            NoDefinition
DebugLoc:        { File: header.h, Line: 3, Column: 10 }
Function:        helper
Args:
  - Callee:          ext
  - String:          ' will not be inlined'
...
--- !Analysis
Pass:            prologepilog
Name:            StackSize
DebugLoc:        { File: code.c, Line: 1, Column: 0 }
Function:        add
Args:
  - NumStackBytes:   '0'
  - String:          ' stack bytes in function'
...
";

/// Writes an executable script that behaves like a compiler: it finds the
/// `-foptimization-record-file=` argument, stores its target in `$out` and
/// then runs `body`.
pub fn fake_compiler(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    let mut script = String::from("#!/bin/bash\nout=/dev/null\nfor arg in \"$@\"; do\n");
    script.push_str("  case \"$arg\" in\n");
    script.push_str("    -foptimization-record-file=*) out=\"${arg#-foptimization-record-file=}\" ;;\n");
    script.push_str("  esac\ndone\n");
    script.push_str(body);
    script.push('\n');
    std::fs::write(&path, script).expect("write fake compiler");
    let mut permissions = std::fs::metadata(&path).expect("metadata").permissions();
    permissions.set_mode(0o755);
    std::fs::set_permissions(&path, permissions).expect("chmod fake compiler");
    path
}

/// A compiler that writes [`CANNED_RECORD`] to the record file.
pub fn recording_compiler(dir: &Path) -> PathBuf {
    let record = dir.join("record.yaml");
    std::fs::write(&record, CANNED_RECORD).expect("write record");
    fake_compiler(
        dir,
        "fake-cc",
        &format!("cat '{}' > \"$out\"", record.display()),
    )
}

pub fn write_source(dir: &Path) -> PathBuf {
    let source = dir.join("code.c");
    std::fs::write(&source, TWO_LINE_SOURCE).expect("write source");
    source
}
