#[macro_use]
extern crate tracing;

use std::{
    fs,
    io::{self, Read, Write},
    path::PathBuf,
};

use anyhow::{Context, Result};
use clap::Parser;
use gasm::{Abi, TargetConfig};

/// Assembles a single GAS-flavor `.s` file (or stdin, given `-`) into an ELF64
/// relocatable object. Stands in for the embedding API's `tcc_add_file` +
/// `-c`/object-output path (§6): one file in, one `.o` out, no linking.
#[derive(Debug, Clone, Parser)]
#[command(name = "tinyas")]
pub struct Opts {
    /// Source file to assemble, or `-` for stdin.
    pub input: PathBuf,

    /// Output object path. Defaults to the input path with its extension
    /// replaced by `.o` (`a.o` when reading from stdin).
    #[arg(short('o'), long("output"))]
    pub output: Option<PathBuf>,

    /// Target ABI for argument/return lowering that inline `asm()` blocks and
    /// the directive engine's symbol mangling care about.
    #[arg(long("abi"), value_enum, default_value = "sys-v")]
    pub abi: AbiArg,

    /// Assume a leading-underscore C symbol convention (macOS/PE). Off by
    /// default since ELF/Linux x86-64 is the only concrete target in scope.
    #[arg(long("leading-underscore"))]
    pub leading_underscore: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum AbiArg {
    SysV,
    Windows,
}

impl From<AbiArg> for Abi {
    fn from(a: AbiArg) -> Self {
        match a {
            AbiArg::SysV => Abi::SysV,
            AbiArg::Windows => Abi::Windows,
        }
    }
}

fn default_output(input: &std::path::Path) -> PathBuf {
    if input == std::path::Path::new("-") {
        return PathBuf::from("a.o");
    }
    input.with_extension("o")
}

pub fn run(opts: Opts) -> Result<()> {
    let config = TargetConfig {
        leading_underscore: opts.leading_underscore,
        abi: opts.abi.into(),
    };

    let src = read_input(&opts.input)
        .with_context(|| format!("reading {}", opts.input.display()))?;

    info!(input = %opts.input.display(), abi = ?config.abi, "assembling");

    let object = gasm::assemble(&src, config)
        .with_context(|| format!("assembling {}", opts.input.display()))?;

    let bytes = asmobj::ObjectWriter::new(&object.sections, &object.symbols, &object.relocs)
        .write()
        .context("writing ELF64 object")?;

    let output_path = opts.output.unwrap_or_else(|| default_output(&opts.input));
    fs::write(&output_path, &bytes)
        .with_context(|| format!("writing {}", output_path.display()))?;

    info!(output = %output_path.display(), bytes = bytes.len(), "wrote object");

    Ok(())
}

fn read_input(path: &std::path::Path) -> Result<Vec<u8>> {
    if path == std::path::Path::new("-") {
        let mut buf = Vec::new();
        io::stdin().read_to_end(&mut buf)?;
        Ok(buf)
    } else {
        Ok(fs::read(path)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembles_a_tiny_function_to_a_valid_elf_object() {
        let mut src_file = tempfile::Builder::new().suffix(".s").tempfile().unwrap();
        src_file
            .write_all(b".globl add_one\nadd_one:\nmov %rdi, %rax\nadd $1, %rax\nret\n")
            .unwrap();

        let out_path = src_file.path().with_extension("o");
        let opts = Opts {
            input: src_file.path().to_path_buf(),
            output: Some(out_path.clone()),
            abi: AbiArg::SysV,
            leading_underscore: false,
        };
        run(opts).unwrap();

        let mut bytes = Vec::new();
        fs::File::open(&out_path).unwrap().read_to_end(&mut bytes).unwrap();
        assert_eq!(&bytes[..4], b"\x7fELF");
        fs::remove_file(&out_path).ok();
    }

    #[test]
    fn default_output_swaps_extension_to_o() {
        assert_eq!(default_output(std::path::Path::new("foo.s")), PathBuf::from("foo.o"));
        assert_eq!(default_output(std::path::Path::new("-")), PathBuf::from("a.o"));
    }
}
