use anyhow::Context;
use anyhow::Result;
use clap::Args;
use clap::Parser;
use clap::Subcommand;
use optinfo_remarks::AnalysisOutcome;
use optinfo_remarks::AnalysisSession;
use optinfo_remarks::Anchor;
use optinfo_remarks::AnchorKind;
use optinfo_remarks::CompileCommand;
use optinfo_remarks::CompileCommandResolver;
use optinfo_remarks::GroupedRemarks;
use optinfo_remarks::LocatorKind;
use optinfo_remarks::Lookup;
use optinfo_remarks::NotFoundReason;
use optinfo_remarks::NoticeLatch;
use optinfo_remarks::OneBasedLine;
use optinfo_remarks::ProduceOutcome;
use optinfo_remarks::Remark;
use optinfo_remarks::RemarkKind;
use optinfo_remarks::RemarkProducer;
use optinfo_remarks::RemarksConfig;
use optinfo_remarks::SourceRange;
use optinfo_remarks::ZeroBasedLine;
use optinfo_remarks::analyze_range;
use optinfo_remarks::is_supported_source;
use optinfo_remarks::locator_for;
use optinfo_remarks::to_diagnostics;
use owo_colors::OwoColorize;
use std::path::Path;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;

/// Inspect the optimization remarks a compiler emits for a C/C++ file.
#[derive(Debug, Parser)]
#[command(name = "optinfo", version)]
pub struct OptinfoCli {
    /// Workspace root (defaults to the current directory)
    #[arg(long, short = 'w', value_name = "DIR", global = true)]
    pub workspace: Option<PathBuf>,

    /// Configuration file (defaults to <workspace>/.optinfo.toml)
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Compile command to use instead of looking one up
    #[arg(long, value_name = "COMMAND", global = true)]
    pub compile_command: Option<String>,

    /// Directory the compile command runs in (defaults to the workspace)
    #[arg(long, value_name = "DIR", global = true, requires = "compile_command")]
    pub directory: Option<PathBuf>,

    /// Log more (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: OptinfoCommand,
}

#[derive(Debug, Subcommand)]
pub enum OptinfoCommand {
    /// Print the compile command used for a file
    Resolve(FileArgs),

    /// Collect every remark for a file
    Remarks(RemarksArgs),

    /// Remarks inside a line range, grouped by pass
    Range(RangeArgs),

    /// List functions and loops in a file
    Anchors(AnchorsArgs),
}

#[derive(Debug, Args)]
pub struct FileArgs {
    #[arg(value_name = "FILE")]
    pub file: PathBuf,
}

#[derive(Debug, Args)]
pub struct RemarksArgs {
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Print remarks as JSON
    #[arg(long)]
    pub json: bool,

    /// Print editor diagnostics as JSON instead of remarks
    #[arg(long, conflicts_with = "json")]
    pub diagnostics: bool,
}

#[derive(Debug, Args)]
pub struct RangeArgs {
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    #[arg(long, value_name = "LINE")]
    pub start_line: u32,

    #[arg(long, value_name = "LINE")]
    pub end_line: u32,

    #[arg(long, value_name = "COLUMN")]
    pub start_column: Option<u32>,

    #[arg(long, value_name = "COLUMN")]
    pub end_column: Option<u32>,

    /// Only show remarks of this pass
    #[arg(long, value_name = "PASS")]
    pub pass: Option<String>,

    /// Lines and columns count from zero, like an editor's
    #[arg(long)]
    pub zero_based: bool,

    /// Print the result as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Args)]
pub struct AnchorsArgs {
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Print anchors as JSON
    #[arg(long)]
    pub json: bool,
}

impl RangeArgs {
    fn range(&self) -> SourceRange {
        if self.zero_based {
            return SourceRange::from_zero_based(
                ZeroBasedLine(self.start_line),
                self.start_column.unwrap_or(0),
                ZeroBasedLine(self.end_line),
                self.end_column.unwrap_or(u32::MAX),
            );
        }
        let mut range = SourceRange::lines(OneBasedLine(self.start_line), OneBasedLine(self.end_line));
        if let Some(column) = self.start_column {
            range.start.column = column;
        }
        if let Some(column) = self.end_column {
            range.end.column = column;
        }
        range
    }
}

/// Everything resolved from the global options.
struct RunContext {
    workspace: PathBuf,
    config: RemarksConfig,
    notices: NoticeLatch,
    compile_command: Option<String>,
    directory: Option<PathBuf>,
}

impl RunContext {
    fn absolute(&self, file: &Path) -> Result<PathBuf> {
        if file.is_absolute() {
            return Ok(file.to_path_buf());
        }
        let cwd = std::env::current_dir().context("Failed to get current directory")?;
        Ok(cwd.join(file))
    }

    fn ensure_source(&self, file: &Path) -> Result<()> {
        if !is_supported_source(file, &self.config) {
            anyhow::bail!(
                "{} is not a C/C++ source file (expected one of {})",
                file.display(),
                self.config.source_extensions.join(" ")
            );
        }
        Ok(())
    }

    fn compile_command(&self, file: &Path) -> Result<CompileCommand> {
        if let Some(command) = &self.compile_command {
            let directory = self
                .directory
                .clone()
                .unwrap_or_else(|| self.workspace.clone());
            return Ok(CompileCommand::new(directory, file, command.clone()));
        }

        let resolver = CompileCommandResolver::new(&self.config, self.notices.clone());
        match resolver.resolve(file, &self.workspace) {
            Lookup::Found(command) => Ok(command),
            Lookup::NotFound(NotFoundReason::NoDatabase) => anyhow::bail!(
                "no compile command for {}: no compile_commands.json under {}",
                file.display(),
                self.workspace.display()
            ),
            Lookup::NotFound(NotFoundReason::NoMatchingEntry) => anyhow::bail!(
                "no compile command for {}: the compile database has no entry for it",
                file.display()
            ),
        }
    }
}

impl OptinfoCli {
    pub async fn run(self) -> Result<()> {
        let workspace = match self.workspace {
            Some(dir) => dir,
            None => std::env::current_dir().context("Failed to get current directory")?,
        };
        let config = match &self.config {
            Some(path) => RemarksConfig::load(path)
                .with_context(|| format!("Failed to load config from {}", path.display()))?,
            None => RemarksConfig::load_from_workspace(&workspace)
                .context("Failed to load workspace config")?,
        };
        let ctx = RunContext {
            workspace,
            config,
            notices: NoticeLatch::new(),
            compile_command: self.compile_command,
            directory: self.directory,
        };

        match self.command {
            OptinfoCommand::Resolve(args) => run_resolve(&ctx, args),
            OptinfoCommand::Remarks(args) => run_remarks(&ctx, args).await,
            OptinfoCommand::Range(args) => run_range(&ctx, args).await,
            OptinfoCommand::Anchors(args) => run_anchors(&ctx, args).await,
        }
    }
}

fn run_resolve(ctx: &RunContext, args: FileArgs) -> Result<()> {
    let file = ctx.absolute(&args.file)?;
    let command = ctx.compile_command(&file)?;
    println!("{} {}", "directory:".bright_black(), command.directory.display());
    println!("{} {}", "file:".bright_black(), command.file.display());
    println!("{} {}", "command:".bright_black(), command.command);
    Ok(())
}

/// Cancels `token` on Ctrl-C.
fn cancel_on_interrupt() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            child.cancel();
        }
    });
    token
}

fn print_compiler_error(line: &str) {
    eprintln!("{}", line.red());
}

async fn run_remarks(ctx: &RunContext, args: RemarksArgs) -> Result<()> {
    let file = ctx.absolute(&args.file)?;
    ctx.ensure_source(&file)?;
    let command = ctx.compile_command(&file)?;

    let producer = RemarkProducer::new(&ctx.config, ctx.notices.clone());
    let cancel = cancel_on_interrupt();
    let remarks = match producer
        .produce(&command, &cancel, print_compiler_error)
        .await
    {
        ProduceOutcome::Completed(remarks) => remarks,
        ProduceOutcome::Cancelled(remarks) => {
            eprintln!("{} cancelled; showing partial results", "!".yellow());
            remarks
        }
        ProduceOutcome::Failed { message, partial } if partial.is_empty() => {
            anyhow::bail!("compiler failed: {message}");
        }
        ProduceOutcome::Failed { partial, .. } => {
            eprintln!("{} compiler reported errors; showing partial results", "!".yellow());
            partial
        }
    };

    if args.diagnostics {
        println!("{}", serde_json::to_string_pretty(&to_diagnostics(&remarks))?);
    } else if args.json {
        println!("{}", serde_json::to_string_pretty(&remarks)?);
    } else if remarks.is_empty() {
        println!("{} No remarks for {}", "✗".bright_red(), file.display());
    } else {
        for remark in &remarks {
            print_remark(remark);
        }
    }
    Ok(())
}

async fn run_range(ctx: &RunContext, args: RangeArgs) -> Result<()> {
    let file = ctx.absolute(&args.file)?;
    ctx.ensure_source(&file)?;
    let command = ctx.compile_command(&file)?;
    let range = args.range();

    let session = AnalysisSession::new();
    let producer = RemarkProducer::new(&ctx.config, ctx.notices.clone());
    let interrupt = cancel_on_interrupt();
    let analysis = analyze_range(&session, &producer, &command, range, print_compiler_error);
    tokio::pin!(analysis);
    let outcome = tokio::select! {
        outcome = &mut analysis => outcome?,
        _ = interrupt.cancelled() => {
            session.cancel();
            analysis.await?
        }
    };

    let grouped = match outcome {
        AnalysisOutcome::Remarks(grouped) => grouped,
        AnalysisOutcome::RangeUpdated => return Ok(()),
        AnalysisOutcome::Cancelled => {
            eprintln!("{} cancelled", "!".yellow());
            return Ok(());
        }
        AnalysisOutcome::Partial { remarks, message } => {
            eprintln!("{} compiler failed ({message}); showing partial results", "!".yellow());
            remarks
        }
        AnalysisOutcome::Failed(message) => anyhow::bail!("compiler failed: {message}"),
    };

    match &args.pass {
        Some(pass) => print_selection(&grouped, pass, args.json),
        None => print_grouped(&grouped, range, args.json),
    }
}

fn print_selection(grouped: &GroupedRemarks, pass: &str, json: bool) -> Result<()> {
    let remarks = grouped.select(pass);
    if json {
        println!("{}", serde_json::to_string_pretty(remarks)?);
        return Ok(());
    }
    if remarks.is_empty() {
        println!("{} No {} remarks in range", "✗".bright_red(), pass.bright_cyan());
    }
    for remark in remarks {
        print_remark(remark);
    }
    Ok(())
}

fn print_grouped(grouped: &GroupedRemarks, range: SourceRange, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(grouped)?);
        return Ok(());
    }
    println!("{} {}", "Range".bright_black(), range);
    for label in grouped.choices() {
        let count = grouped.select(label).len();
        println!("  {} ({})", label.bright_cyan(), count);
    }
    for remark in &grouped.all {
        print_remark(remark);
    }
    Ok(())
}

fn print_remark(remark: &Remark) {
    let kind = match remark.kind {
        RemarkKind::Passed => remark.kind.as_str().bright_green().to_string(),
        RemarkKind::Missed => remark.kind.as_str().bright_red().to_string(),
        RemarkKind::Analysis => remark.kind.as_str().bright_yellow().to_string(),
    };
    println!(
        "{} {} {}/{}: {}",
        remark.debug_location.to_string().bright_black(),
        kind,
        remark.pass.bright_cyan(),
        remark.name,
        remark.message()
    );
}

async fn run_anchors(ctx: &RunContext, args: AnchorsArgs) -> Result<()> {
    let file = ctx.absolute(&args.file)?;
    let source = std::fs::read_to_string(&file)
        .with_context(|| format!("Failed to read {}", file.display()))?;

    let command = match ctx.config.locator {
        LocatorKind::Regex => None,
        LocatorKind::AstTool => ctx.compile_command(&file).ok(),
    };
    let locator = locator_for(&ctx.config, command.as_ref());
    let anchors = locator
        .locate(&file, &source)
        .await
        .context("Failed to locate functions and loops")?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&anchors)?);
        return Ok(());
    }
    for anchor in &anchors {
        print_anchor(anchor);
    }
    Ok(())
}

fn print_anchor(anchor: &Anchor) {
    let kind = match anchor.kind {
        AnchorKind::Function => "function".bright_blue().to_string(),
        AnchorKind::Loop => "loop".bright_magenta().to_string(),
    };
    println!(
        "{} {} {}",
        kind,
        anchor.name.as_deref().unwrap_or("-"),
        anchor.range.to_string().bright_black()
    );
}
