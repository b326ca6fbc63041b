use std::path::Path;

use anyhow::Context;
use tracing_subscriber::EnvFilter;

use procrun::cli::Cli;
use procrun::error::ReturnCode;
use procrun::{OutputMode, RunState, Runner, Session};

/// Number of trailing stderr lines quoted in a failure report
const STDERR_TAIL_LINES: usize = 20;

fn main() {
    std::process::exit(run());
}

fn run() -> i32 {
    let args = Cli::parse_args();
    init_logging(&args);

    if let Err(e) = args.validate() {
        eprintln!("procrun: {}", e);
        eprintln!("Use \"procrun -h\" to get help");
        return e.exit_code();
    }

    let runner = match build_runner(&args) {
        Ok(runner) => runner,
        Err(e) => {
            eprintln!("procrun: {:#}", e);
            return ReturnCode::InvalidArguments.as_exit_code();
        }
    };

    if args.exec {
        let error = runner.exec(args.arguments());
        eprintln!("procrun: {}", error);
        return error.exit_code();
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread().enable_all().build() {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("procrun: Failed to start async runtime: {}", e);
            return ReturnCode::RuntimeError.as_exit_code();
        }
    };

    runtime.block_on(supervise(&runner, &args))
}

/// Install the stderr log subscriber; `PROCRUN_LOG` overrides `-v`
fn init_logging(args: &Cli) {
    let filter = EnvFilter::try_from_env("PROCRUN_LOG")
        .unwrap_or_else(|_| EnvFilter::new(args.log_level()));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn build_runner(args: &Cli) -> anyhow::Result<Runner> {
    let program = args.program();
    let mut runner = if program.contains(std::path::MAIN_SEPARATOR) {
        Runner::new(program)
    } else {
        Runner::for_command(program)
    };
    tracing::debug!(executable = %runner.executable().display(), "resolved command");

    runner.envs(args.env_pairs().context("invalid --env value")?);
    if let Some(ref dir) = args.cwd {
        runner.set_cwd(Some(dir.to_path_buf()));
    }
    Ok(runner)
}

/// Run the child to completion and translate its state into our exit code
async fn supervise(runner: &Runner, args: &Cli) -> i32 {
    let session = runner.run(args.arguments(), args.stdout, args.stderr);
    let state = session.wait_until_finished().await;

    if !state.is_success() {
        eprintln!("{}", failure_report(runner.executable(), &session, &state).await);
    }
    state.exit_code()
}

async fn failure_report(executable: &Path, session: &Session, state: &RunState) -> String {
    let mut report = format!("procrun: {} {}", executable.display(), state);

    // In Both mode the user has already seen stderr.
    if session.stderr().mode() == OutputMode::Capture {
        let stderr = session.stderr().string().await;
        let lines: Vec<&str> = stderr.lines().collect();
        let tail = &lines[lines.len().saturating_sub(STDERR_TAIL_LINES)..];
        if !tail.is_empty() {
            report.push_str("\nstderr was:\n");
            report.push_str(&tail.join("\n"));
        }
    }
    report
}
