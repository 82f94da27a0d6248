use clap::{Parser, Subcommand};
use fwpatch::commands::{self, ProfileSource};
use fwpatch::config::{ByteOverride, LevelOverride, ProfileFile};
use std::path::PathBuf;

#[derive(Parser)]
#[clap(name = "fwpatch", about = "Battery calibration patcher for bisrv.asd firmware images")]
struct Fwpatch {
    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Check the stock values, patch the battery table and fix the checksum.
    Patch {
        #[clap(default_value = "bisrv-08_03.asd")]
        input: PathBuf,
        #[clap(default_value = "bisrv.asd")]
        output: PathBuf,

        /// JSON profile to use instead of a built-in one
        #[clap(long, short)]
        profile: Option<PathBuf>,

        /// Built-in firmware revision
        #[clap(long, short, default_value = "08.03", conflicts_with = "profile")]
        revision: String,

        /// Set a battery level by label, e.g. --level "5 bars=4.1"
        #[clap(long = "level", short = 'l')]
        levels: Vec<LevelOverride>,

        /// Write a raw byte, e.g. --set 0x3564ec=0xC5
        #[clap(long = "set")]
        sets: Vec<ByteOverride>,
    },
    /// Check that an image's checksum field matches its contents.
    Verify {
        input: PathBuf,

        /// Take the checksum layout from this profile
        #[clap(long, short)]
        profile: Option<PathBuf>,
    },
    /// Print the checksum of an image.
    Checksum {
        input: PathBuf,

        #[clap(long, default_value = "512")]
        coverage_start: usize,
    },
    /// Print a built-in profile as JSON.
    Profile {
        #[clap(long, short, default_value = "08.03")]
        revision: String,

        #[clap(long, short)]
        out: Option<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    fwpatch::init_logging();

    let args = Fwpatch::parse();

    match args.command {
        Command::Patch {
            input,
            output,
            profile,
            revision,
            levels,
            sets,
        } => {
            let source = match profile {
                Some(path) => ProfileSource::File(path),
                None => ProfileSource::Builtin(revision),
            };
            commands::patch(&input, &output, &source, &levels, &sets)?;
        }
        Command::Verify { input, profile } => {
            let layout = match profile {
                Some(path) => ProfileFile::load(&path)?.layout,
                None => Default::default(),
            };
            commands::verify(&input, layout)?;
        }
        Command::Checksum {
            input,
            coverage_start,
        } => {
            commands::checksum(&input, coverage_start)?;
        }
        Command::Profile { revision, out } => commands::profile(&revision, out.as_deref())?,
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revision_and_profile_conflict() {
        let err = Fwpatch::try_parse_from(["fwpatch", "patch", "--profile", "p.json", "--revision", "08.03"])
            .err()
            .unwrap();
        assert_eq!(err.kind(), clap::ErrorKind::ArgumentConflict);

        assert!(Fwpatch::try_parse_from(["fwpatch", "patch", "--profile", "p.json"]).is_ok());
        assert!(Fwpatch::try_parse_from(["fwpatch", "patch", "--revision", "08.03"]).is_ok());
    }
}
