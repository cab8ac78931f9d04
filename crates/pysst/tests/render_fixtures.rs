//! Builds every `tests/fixtures/*.py`, compares the rendered tree with the `.sst` file next to it
//! and checks that the module survives the binary form.
//!
//! Run with `PYSST_BLESS=1` to rewrite the expected files from the current output.

use std::{fs, path::Path};

use pysst::{Module, build, render::render_module};
use similar::TextDiff;

fn render_fixture(path: &Path) -> datatest_stable::Result<()> {
    let source = fs::read_to_string(path)?;
    let module = build(&source)?;
    let rendered = render_module(&module);

    let expected_path = path.with_extension("sst");
    if std::env::var_os("PYSST_BLESS").is_some() {
        fs::write(&expected_path, &rendered)?;
    } else {
        let expected = fs::read_to_string(&expected_path)?;
        if expected != rendered {
            let diff = TextDiff::from_lines(&expected, &rendered)
                .unified_diff()
                .header("expected", "rendered")
                .to_string();
            return Err(format!("{} does not match:\n{diff}", expected_path.display()).into());
        }
    }

    let loaded = Module::load(&module.dump()?)?;
    if loaded != module {
        return Err(format!("{} changed across dump and load", path.display()).into());
    }
    Ok(())
}

datatest_stable::harness!(render_fixture, "tests/fixtures", r"^.*\.py$");
