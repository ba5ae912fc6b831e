use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use classenhance::metadata::internal_name;
use classenhance::{
    Dialect, EnhancementValidator, Enhancer, EnhancerOptions, KeyClassDescriptor, KeyClassGenerator, MetadataRegistry,
};
use std::fs;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;
use walkdir::WalkDir;

#[derive(Parser)]
#[command(name = "classenhance")]
#[command(about = "Make compiled JVM classes persistence-capable")]
#[command(version)]
struct Cli {
    /// Log every rewritten site and synthesized member
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Enhance a .class file or every .class file under a directory
    Enhance {
        /// Input .class file or directory
        #[arg(value_name = "PATH")]
        input: PathBuf,

        /// Metadata JSON file
        #[arg(short, long, value_name = "FILE")]
        metadata: PathBuf,

        /// Output directory; classes are rewritten in place when omitted
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,

        /// Enhancer option, e.g. enhancer.dialect=datanucleus
        #[arg(long = "option", value_name = "KEY=VALUE")]
        options: Vec<String>,
    },

    /// Check whether classes carry the full enhancement contract
    Validate {
        /// Input .class file or directory
        #[arg(value_name = "PATH")]
        input: PathBuf,

        /// Metadata JSON file
        #[arg(short, long, value_name = "FILE")]
        metadata: PathBuf,

        /// Naming dialect (jdo or datanucleus)
        #[arg(long, default_value = "jdo")]
        dialect: Dialect,
    },

    /// Generate the companion key class of a persistent class
    Keygen {
        /// Metadata JSON file
        #[arg(short, long, value_name = "FILE")]
        metadata: PathBuf,

        /// Persistent class, dotted or internal form
        #[arg(long = "class", value_name = "NAME")]
        class: String,

        /// Key class name; defaults to the class name with the `_PK` suffix
        #[arg(long, value_name = "NAME")]
        key_name: Option<String>,

        /// Output directory
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,
    },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match &cli.command {
        Commands::Enhance { input, metadata, output, options } => enhance(input, metadata, output.as_deref(), options),
        Commands::Validate { input, metadata, dialect } => validate(input, metadata, *dialect),
        Commands::Keygen { metadata, class, key_name, output } => {
            keygen(metadata, class, key_name.as_deref(), output.as_deref())
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "classenhance=debug" } else { "classenhance=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn load_metadata(path: &Path) -> Result<MetadataRegistry> {
    let json = fs::read_to_string(path).with_context(|| format!("reading metadata {}", path.display()))?;
    MetadataRegistry::from_json(&json).with_context(|| format!("parsing metadata {}", path.display()))
}

/// `.class` files at `input`, each with its path relative to the input root
fn class_files(input: &Path) -> Result<Vec<(PathBuf, PathBuf)>> {
    if input.is_file() {
        let name = input.file_name().map(PathBuf::from).unwrap_or_default();
        return Ok(vec![(input.to_path_buf(), name)]);
    }
    let mut files = Vec::new();
    for entry in WalkDir::new(input).sort_by_file_name() {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type().is_file() && path.extension().is_some_and(|e| e == "class") {
            let relative = path.strip_prefix(input).unwrap_or(path).to_path_buf();
            files.push((path.to_path_buf(), relative));
        }
    }
    Ok(files)
}

/// Classpath root holding `class_file`, found by climbing one directory per package
/// segment of `internal_name` (the key class shares the enhanced class's package)
fn package_root(class_file: &Path, internal_name: &str) -> PathBuf {
    let depth = internal_name.matches('/').count();
    class_file
        .ancestors()
        .nth(depth + 1)
        .map(Path::to_path_buf)
        .unwrap_or_default()
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))
}

fn enhance(input: &Path, metadata: &Path, output: Option<&Path>, assignments: &[String]) -> Result<()> {
    let registry = load_metadata(metadata)?;
    let pairs = assignments
        .iter()
        .map(|a| EnhancerOptions::parse_assignment(a))
        .collect::<classenhance::Result<Vec<_>>>()?;
    let options = EnhancerOptions::from_properties(pairs.iter().map(|(k, v)| (k.as_str(), v.as_str())))?;
    let policy = options.naming_policy();
    let enhancer = Enhancer::new(&policy, &registry, options);
    let root = if input.is_file() { input.parent().unwrap_or(Path::new(".")) } else { input };

    let mut failures = 0usize;
    let mut enhanced = 0usize;
    for (path, relative) in class_files(input)? {
        let bytes = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        let result = match enhancer.enhance(&bytes) {
            Ok(result) => result,
            Err(e) => {
                tracing::error!(file = %path.display(), error = %e, "enhancement failed");
                failures += 1;
                continue;
            }
        };
        let target_root = output.unwrap_or(root);
        if result.changed {
            write_file(&target_root.join(&relative), &result.bytes)?;
            enhanced += 1;
        } else if output.is_some() {
            write_file(&target_root.join(&relative), &bytes)?;
        }
        if let Some(companion) = result.companion {
            let root = package_root(&target_root.join(&relative), &companion.name);
            write_file(&root.join(format!("{}.class", companion.name)), &companion.bytes)?;
        }
    }
    tracing::info!(enhanced, failures, "done");
    if failures > 0 {
        bail!("{} class(es) failed to enhance", failures);
    }
    Ok(())
}

fn validate(input: &Path, metadata: &Path, dialect: Dialect) -> Result<()> {
    let registry = load_metadata(metadata)?;
    let policy = classenhance::NamingPolicy::for_dialect(dialect);
    let validator = EnhancementValidator::new(&policy, &registry);

    let mut failures = 0usize;
    for (path, _) in class_files(input)? {
        let bytes = fs::read(&path).with_context(|| format!("reading {}", path.display()))?;
        let report = validator.validate(&bytes);
        if report.is_enhanced() {
            println!("{}: enhanced", path.display());
        } else if report.is_not_persistent() {
            println!("{}: not persistent, skipped", path.display());
        } else {
            failures += 1;
            println!("{}: not enhanced", path.display());
            for message in report.messages() {
                println!("  {}", message);
            }
        }
    }
    if failures > 0 {
        bail!("{} class(es) are not enhanced", failures);
    }
    Ok(())
}

fn keygen(metadata: &Path, class: &str, key_name: Option<&str>, output: Option<&Path>) -> Result<()> {
    let registry = load_metadata(metadata)?;
    let class = internal_name(class);
    let key_name = match key_name {
        Some(name) => internal_name(name),
        None => format!("{}{}", class, classenhance::enhance::GENERATED_KEY_SUFFIX),
    };
    let descriptor = KeyClassDescriptor::from_metadata(&registry, &class, &key_name)?;
    let generated = KeyClassGenerator::new().generate(&descriptor)?;
    let path = output.unwrap_or(Path::new(".")).join(format!("{}.class", generated.name));
    write_file(&path, &generated.bytes)?;
    println!("{}", path.display());
    Ok(())
}
