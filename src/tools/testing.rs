//! Scripted stand-in for PostgreSQL and gzip used by unit tests
//!
//! `pg_dump` writes a small SQL file naming the dumped database, `gzip`
//! replaces a file with a `GZ`-prefixed `.gz` copy, `gunzip -c` reverses that
//! into the redirected stdout file, and `psql` records what it was asked to
//! load. Any command matching a registered predicate exits with code 1.

use std::cell::RefCell;
use std::fs;
use std::path::Path;

use super::{ToolCommand, ToolOutput, ToolRunner};
use crate::error::VaultResult;

type Matcher = Box<dyn Fn(&ToolCommand) -> bool>;

const GZ_MAGIC: &[u8] = b"GZ";

#[derive(Default)]
pub(crate) struct FakeRunner {
    calls: RefCell<Vec<ToolCommand>>,
    failures: RefCell<Vec<Matcher>>,
    query_output: RefCell<String>,
    loaded: RefCell<Vec<(String, String)>>,
}

impl FakeRunner {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Make every command matching `matcher` exit with code 1
    pub(crate) fn fail_when(&self, matcher: impl Fn(&ToolCommand) -> bool + 'static) {
        self.failures.borrow_mut().push(Box::new(matcher));
    }

    /// Stdout returned by `psql -c`
    pub(crate) fn set_query_output(&self, output: &str) {
        *self.query_output.borrow_mut() = output.to_string();
    }

    pub(crate) fn calls(&self) -> Vec<ToolCommand> {
        self.calls.borrow().clone()
    }

    pub(crate) fn programs(&self) -> Vec<String> {
        self.calls.borrow().iter().map(|c| c.program.clone()).collect()
    }

    /// `(database, file contents)` for every `psql -f` that ran
    pub(crate) fn loaded(&self) -> Vec<(String, String)> {
        self.loaded.borrow().clone()
    }

    /// SQL strings passed to `psql -c`, in order
    pub(crate) fn statements(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|c| c.arg_after("-c").map(str::to_string))
            .collect()
    }

    fn should_fail(&self, command: &ToolCommand) -> bool {
        self.failures.borrow().iter().any(|m| m(command))
    }
}

impl ToolRunner for FakeRunner {
    fn run(&self, command: &ToolCommand) -> VaultResult<ToolOutput> {
        self.calls.borrow_mut().push(command.clone());
        let failing = self.should_fail(command);

        let mut output = ToolOutput {
            code: Some(if failing { 1 } else { 0 }),
            ..Default::default()
        };
        if failing {
            output.stderr = format!("{}: simulated failure", command.program);
        }

        match command.program.as_str() {
            "pg_dump" => {
                if let (Some(db), Some(out)) = (command.arg_after("-d"), command.arg_after("-f")) {
                    let body = if failing {
                        "-- partial".to_string()
                    } else {
                        format!("-- dump of {}\nCREATE TABLE selftest_items ();\n", db)
                    };
                    let _ = fs::write(out, body);
                }
            }
            "gzip" if !failing => {
                if let Some(path) = command.args.last() {
                    let raw = fs::read(path)?;
                    let mut packed = GZ_MAGIC.to_vec();
                    packed.extend_from_slice(&raw);
                    fs::write(format!("{}.gz", path), packed)?;
                    fs::remove_file(path)?;
                }
            }
            "gunzip" if !failing => {
                let source = command.arg_after("-c").unwrap_or_default();
                let packed = fs::read(source)?;
                let raw = packed.strip_prefix(GZ_MAGIC).unwrap_or(&packed[..]).to_vec();
                match &command.stdout_path {
                    Some(dest) => fs::write(dest, raw)?,
                    None => output.stdout = String::from_utf8_lossy(&raw).into_owned(),
                }
            }
            "gunzip" => {
                if let Some(dest) = &command.stdout_path {
                    let _ = fs::write(dest, "");
                }
            }
            "psql" if !failing => {
                if let Some(file) = command.arg_after("-f") {
                    if Path::new(file).exists() {
                        let contents = fs::read_to_string(file)?;
                        let db = command.arg_after("-d").unwrap_or_default().to_string();
                        self.loaded.borrow_mut().push((db, contents));
                    } else {
                        output.code = Some(2);
                        output.stderr = format!("psql: {}: No such file or directory", file);
                    }
                } else if command.arg_after("-c").is_some() {
                    output.stdout = self.query_output.borrow().clone();
                }
            }
            _ => {}
        }

        Ok(output)
    }
}
