//! Primer removal by an external tool.
//!
//! The pipeline only knows the narrow contract of a [`PrimerTrimmer`]: a pair of
//! input files goes in, a pair of output files and a log come out. The argument
//! conventions of the actual tool live in the command template of an
//! [`ExternalTrimmer`].

use anyhow::{bail, ensure, Context, Result};
use log::{debug, info};
use std::path::{Path, PathBuf};
use std::process::Command;

/// One sample's worth of primer trimming.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrimJob {
    pub sample: String,
    pub inputs: [PathBuf; 2],
    pub outputs: [PathBuf; 2],
}

/// The files produced by a trimmer and whatever it wrote to stdout/stderr.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrimOutcome {
    pub outputs: [PathBuf; 2],
    pub log: String,
}

/// Removes primers from a pair of FASTQ files.
pub trait PrimerTrimmer: Send + Sync {
    fn trim(&self, job: &TrimJob) -> Result<TrimOutcome>;
}

/// Use the input files unchanged, for reads whose primers are already gone.
#[derive(Debug, Default, Clone, Copy)]
pub struct PassThrough;

impl PrimerTrimmer for PassThrough {
    fn trim(&self, job: &TrimJob) -> Result<TrimOutcome> {
        Ok(TrimOutcome {
            outputs: job.inputs.clone(),
            log: String::new(),
        })
    }
}

/// Run a program once per sample. Arguments may contain the placeholders
/// `{in1}`, `{in2}`, `{out1}`, `{out2}` and `{sample}`, e.g.
/// `cutadapt -g ^GTGCCAGC -G ^GGACTACH -o {out1} -p {out2} {in1} {in2}`.
#[derive(Debug, Clone)]
pub struct ExternalTrimmer {
    program: PathBuf,
    args: Vec<String>,
}

const PLACEHOLDERS: [&str; 5] = ["{in1}", "{in2}", "{out1}", "{out2}", "{sample}"];

impl ExternalTrimmer {
    pub fn new(program: impl Into<PathBuf>, args: Vec<String>) -> Result<ExternalTrimmer> {
        for required in &PLACEHOLDERS[..4] {
            ensure!(
                args.iter().any(|a| a.contains(required)),
                "primer trimmer arguments must contain the placeholder {required}"
            );
        }
        Ok(ExternalTrimmer {
            program: program.into(),
            args,
        })
    }

    /// Parse a whitespace-separated command template. The first word is the program.
    pub fn from_template(template: &str) -> Result<ExternalTrimmer> {
        let mut words = template.split_whitespace();
        let Some(program) = words.next() else {
            bail!("primer trimmer command is empty");
        };
        ExternalTrimmer::new(program, words.map(String::from).collect())
    }

    fn render(&self, job: &TrimJob) -> Vec<String> {
        let values = [
            job.inputs[0].display().to_string(),
            job.inputs[1].display().to_string(),
            job.outputs[0].display().to_string(),
            job.outputs[1].display().to_string(),
            job.sample.clone(),
        ];
        self.args
            .iter()
            .map(|arg| {
                PLACEHOLDERS
                    .iter()
                    .zip(&values)
                    .fold(arg.clone(), |acc, (key, value)| acc.replace(key, value))
            })
            .collect()
    }
}

fn require_file(path: &Path, sample: &str) -> Result<()> {
    ensure!(
        path.is_file(),
        "primer trimmer for sample {sample} did not produce {}",
        path.display()
    );
    Ok(())
}

impl PrimerTrimmer for ExternalTrimmer {
    fn trim(&self, job: &TrimJob) -> Result<TrimOutcome> {
        let args = self.render(job);
        debug!("running {} {}", self.program.display(), args.join(" "));
        let output = Command::new(&self.program)
            .args(&args)
            .output()
            .with_context(|| format!("Running {}", self.program.display()))?;
        let mut log = String::from_utf8_lossy(&output.stdout).into_owned();
        log.push_str(&String::from_utf8_lossy(&output.stderr));
        if !output.status.success() {
            bail!(
                "primer trimmer {} failed for sample {} ({}):\n{log}",
                self.program.display(),
                job.sample,
                output.status
            );
        }
        for out in &job.outputs {
            require_file(out, &job.sample)?;
        }
        info!("trimmed primers for sample {}", job.sample);
        Ok(TrimOutcome {
            outputs: job.outputs.clone(),
            log,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn job(dir: &Path) -> TrimJob {
        TrimJob {
            sample: "S1".to_string(),
            inputs: [dir.join("in_1.fq"), dir.join("in_2.fq")],
            outputs: [dir.join("out_1.fq"), dir.join("out_2.fq")],
        }
    }

    #[test]
    fn test_template_requires_placeholders() {
        assert!(ExternalTrimmer::from_template("").is_err());
        assert!(ExternalTrimmer::from_template("cutadapt -o {out1} {in1} {in2}").is_err());
        assert!(ExternalTrimmer::from_template("cutadapt -o {out1} -p {out2} {in1} {in2}").is_ok());
    }

    #[test]
    fn test_render() {
        let trimmer =
            ExternalTrimmer::from_template("tool --name={sample} {in1} {in2} {out1} {out2}")
                .unwrap();
        let job = job(Path::new("/d"));
        assert_eq!(
            trimmer.render(&job),
            vec![
                "--name=S1",
                "/d/in_1.fq",
                "/d/in_2.fq",
                "/d/out_1.fq",
                "/d/out_2.fq"
            ]
        );
    }

    #[test]
    fn test_pass_through() {
        let job = job(Path::new("/d"));
        assert_eq!(PassThrough.trim(&job).unwrap().outputs, job.inputs);
    }

    #[cfg(unix)]
    #[test]
    fn test_external_copy() {
        let dir = tempfile::tempdir().unwrap();
        let job = job(dir.path());
        std::fs::write(&job.inputs[0], "@a\nA\n+\nI\n").unwrap();
        std::fs::write(&job.inputs[1], "@a\nC\n+\nI\n").unwrap();
        // Templates split on whitespace, so pass the script as one argument.
        let trimmer = ExternalTrimmer::new(
            "sh",
            vec![
                "-c".to_string(),
                "cp \"$0\" \"$2\" && cp \"$1\" \"$3\"".to_string(),
                "{in1}".to_string(),
                "{in2}".to_string(),
                "{out1}".to_string(),
                "{out2}".to_string(),
            ],
        )
        .unwrap();
        let outcome = trimmer.trim(&job).unwrap();
        assert_eq!(std::fs::read(&outcome.outputs[1]).unwrap(), b"@a\nC\n+\nI\n");

        let failing = ExternalTrimmer::new(
            "sh",
            vec![
                "-c".to_string(),
                "echo broken >&2; exit 3".to_string(),
                "{in1}".to_string(),
                "{in2}".to_string(),
                "{out1}".to_string(),
                "{out2}".to_string(),
            ],
        )
        .unwrap();
        let err = failing.trim(&job).unwrap_err().to_string();
        assert!(err.contains("broken"), "{err}");
    }
}
