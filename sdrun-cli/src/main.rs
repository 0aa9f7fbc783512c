use std::ffi::OsString;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use sdrun_core::{GenerationRequest, GenerationRunner, RunnerConfig, StableDiffusionLoader};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

const REQUIRED_ARGS: usize = 5;
const USAGE_ERROR: &str = "Error: Not enough arguments";

/// Positional arguments, in the order callers pass them.
#[derive(Parser, Debug)]
#[command(disable_help_flag = true, disable_version_flag = true)]
struct Args {
    #[arg(allow_hyphen_values = true)]
    prompt: String,

    #[arg(allow_hyphen_values = true)]
    negative_prompt: String,

    #[arg(allow_hyphen_values = true, value_parser = parse_steps)]
    steps: usize,

    #[arg(allow_hyphen_values = true, value_parser = parse_guidance)]
    guidance_scale: f64,

    #[arg(allow_hyphen_values = true)]
    output_file: PathBuf,

    /// Anything after the output file is ignored.
    #[arg(allow_hyphen_values = true, hide = true)]
    rest: Vec<String>,
}

/// Counts arguments before any parsing so a short command line always gets
/// the fixed usage message and exit code, whatever the values look like.
fn usage_error(argv: &[OsString]) -> Option<(&'static str, u8)> {
    (argv.len() <= REQUIRED_ARGS).then_some((USAGE_ERROR, 1))
}

/// Parses the command line with every user token taken as a value, so a
/// literal `--` is a prompt rather than the end-of-options marker.
fn parse_args(argv: Vec<OsString>) -> Result<Args, clap::Error> {
    let mut argv = argv.into_iter();
    let program = argv.next().unwrap_or_else(|| OsString::from("sdrun"));
    Args::try_parse_from(
        std::iter::once(program)
            .chain(std::iter::once(OsString::from("--")))
            .chain(argv),
    )
}

fn parse_steps(value: &str) -> Result<usize, String> {
    match value.trim().parse::<usize>() {
        Ok(0) => Err("step count must be at least 1".to_string()),
        Ok(steps) => Ok(steps),
        Err(e) => Err(format!("invalid step count `{value}`: {e}")),
    }
}

fn parse_guidance(value: &str) -> Result<f64, String> {
    value
        .trim()
        .parse::<f64>()
        .map_err(|e| format!("invalid guidance scale `{value}`: {e}"))
}

fn init_logging() {
    let filter = EnvFilter::builder()
        .with_default_directive(tracing::Level::INFO.into())
        .from_env_lossy();
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run(args: Args) -> Result<()> {
    if !args.rest.is_empty() {
        debug!("Ignoring extra arguments: {:?}", args.rest);
    }
    let config = RunnerConfig::from_env()?;
    info!(
        "Model {} on {:?}, output {}",
        config.model_id,
        config.device_map,
        args.output_file.display()
    );

    let loader = StableDiffusionLoader::new(config)?;
    let mut runner = GenerationRunner::new(loader, std::io::stdout().lock());
    let request = GenerationRequest::new(
        args.prompt,
        args.negative_prompt,
        args.steps,
        args.guidance_scale,
    );
    runner.generate(&request, &args.output_file).await
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<ExitCode> {
    let argv: Vec<OsString> = std::env::args_os().collect();
    if let Some((message, code)) = usage_error(&argv) {
        println!("{message}");
        return Ok(ExitCode::from(code));
    }
    let args = parse_args(argv).unwrap_or_else(|e| e.exit());

    init_logging();

    run(args).await?;

    Ok(ExitCode::SUCCESS)
}

#[cfg(test)]
mod tests {
    use clap::error::ErrorKind;

    use super::*;

    fn argv(args: &[&str]) -> Vec<OsString> {
        std::iter::once("sdrun")
            .chain(args.iter().copied())
            .map(OsString::from)
            .collect()
    }

    #[test]
    fn short_command_lines_get_usage_error() {
        assert_eq!(usage_error(&argv(&[])), Some(("Error: Not enough arguments", 1)));
        assert_eq!(
            usage_error(&argv(&["a red cube", "blurry", "20", "7.5"])),
            Some(("Error: Not enough arguments", 1))
        );
        // counted before parsing, so bad values still get the usage message
        assert_eq!(
            usage_error(&argv(&["a", "b", "twenty"])),
            Some(("Error: Not enough arguments", 1))
        );
        assert_eq!(usage_error(&argv(&["a red cube", "blurry", "20", "7.5", "out.png"])), None);
        assert_eq!(usage_error(&argv(&["a", "b", "1", "1", "o.png", "extra"])), None);
    }

    #[test]
    fn parses_full_command_line() {
        let args =
            parse_args(argv(&["a red cube", "blurry", "20", "7.5", "out.png"])).unwrap();
        assert_eq!(args.prompt, "a red cube");
        assert_eq!(args.negative_prompt, "blurry");
        assert_eq!(args.steps, 20);
        assert_eq!(args.guidance_scale, 7.5);
        assert_eq!(args.output_file, PathBuf::from("out.png"));
    }

    #[test]
    fn accepts_hyphenated_values_and_extras() {
        let args = parse_args(argv(&[
            "-bright", "-blurry", "4", "-1.5", "out.png", "ignored", "--also",
        ]))
        .unwrap();
        assert_eq!(args.prompt, "-bright");
        assert_eq!(args.negative_prompt, "-blurry");
        assert_eq!(args.guidance_scale, -1.5);
        assert_eq!(args.rest, vec!["ignored", "--also"]);

        let args = parse_args(argv(&["--", "blurry", "20", "7.5", "out.png"])).unwrap();
        assert_eq!(args.prompt, "--");
        assert_eq!(args.negative_prompt, "blurry");
        assert_eq!(args.steps, 20);
        assert_eq!(args.output_file, PathBuf::from("out.png"));

        let args = parse_args(argv(&["a", "--", "20", "7.5", "out.png", "--"])).unwrap();
        assert_eq!(args.prompt, "a");
        assert_eq!(args.negative_prompt, "--");
        assert_eq!(args.guidance_scale, 7.5);
        assert_eq!(args.rest, vec!["--"]);
    }

    #[test]
    fn numbers_tolerate_padding_and_sign() {
        let args = parse_args(argv(&["a", "b", " 20 ", "+7.5", "o.png"])).unwrap();
        assert_eq!(args.steps, 20);
        assert_eq!(args.guidance_scale, 7.5);

        let args = parse_args(argv(&["a", "b", "+20", " 7.5", "o.png"])).unwrap();
        assert_eq!(args.steps, 20);
    }

    #[test]
    fn rejects_bad_numbers() {
        let err = parse_args(argv(&["a", "b", "twenty", "7.5", "o.png"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);

        let err = parse_args(argv(&["a", "b", "0", "7.5", "o.png"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);

        let err = parse_args(argv(&["a", "b", "20", "high", "o.png"])).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ValueValidation);
    }

    #[test]
    fn empty_prompts_are_allowed() {
        let args = parse_args(argv(&["", "", "1", "1.0", "o.png"])).unwrap();
        assert!(args.prompt.is_empty());
        assert!(args.negative_prompt.is_empty());
    }
}
