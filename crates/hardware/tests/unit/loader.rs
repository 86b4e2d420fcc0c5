//! Program parsing from files, the CLI's loading path.

use std::io::Write;

use tempfile::NamedTempFile;

use runahead_core::core::inst::MicroOp;
use runahead_core::sim::Program;

#[test]
fn test_program_loads_from_file() {
    let mut file = NamedTempFile::new().expect("temp file");
    writeln!(file, "# pointer chase").unwrap();
    writeln!(file, "li r1, 0x200").unwrap();
    writeln!(file, "ld r2, 0(r1), 8").unwrap();
    writeln!(file, "halt").unwrap();
    file.flush().unwrap();

    let text = std::fs::read_to_string(file.path()).expect("read back");
    let program: Program = text.parse().expect("parses");

    assert_eq!(program.len(), 3);
    assert_eq!(
        program.op_at(1),
        Some(MicroOp::Load { rd: 2, base: 1, offset: 0, size: 8 })
    );
}

#[test]
fn test_bad_program_reports_location() {
    let err = "li r1, 0x10\nfrobnicate".parse::<Program>().unwrap_err();
    assert_eq!(err.line, 2);
}
