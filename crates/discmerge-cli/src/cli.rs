//! Command parsing and dispatch for the `discmerge` binary
//!
//! Usage:
//!   discmerge plan   --base <path> --donor [label=]<path> ...
//!   discmerge merge  --base <path> --donor [label=]<path> ... --out <path>
//!   discmerge subset --base <path> --donor [label=]<path> ... --out <path> --songs <ids>
//!
//! Options:
//!   --target <n>       Highest bank version to write
//!   --json             Output in JSON format

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use anyhow::{anyhow, Context};
use discmerge_core::{
    make_plan, BuildOptions, CollisionPolicy, Config, ExportDataset, MergeEngine,
    PlanReport, SubsetBuilder, BASE_LABEL,
};

/// CLI command to execute
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CliCommand {
    Plan,
    Merge,
    Subset,
}

/// A `--donor [label=]path` argument
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DonorArg {
    pub label: String,
    pub path: PathBuf,
}

/// CLI options
#[derive(Debug, Clone, Default)]
pub struct CliOptions {
    pub base: Option<PathBuf>,
    pub donors: Vec<DonorArg>,
    pub out: Option<PathBuf>,
    pub target: Option<u32>,
    pub policy: CollisionPolicy,
    pub json: bool,
    pub songs: BTreeSet<u32>,
    pub prefer: BTreeMap<u32, String>,
    pub overwrite: bool,
    pub no_backup: bool,
    pub fast_update: bool,
}

fn next_value<'a>(args: &'a [String], i: &mut usize, flag: &str) -> Result<&'a str, String> {
    *i += 1;
    args.get(*i)
        .map(String::as_str)
        .ok_or_else(|| format!("{} requires a value", flag))
}

/// Parse CLI arguments and return command + options
pub fn parse_args(args: &[String]) -> Result<(CliCommand, CliOptions), String> {
    let mut options = CliOptions::default();
    let mut command: Option<CliCommand> = None;

    let mut i = 0;
    while i < args.len() {
        let arg = &args[i];
        match arg.as_str() {
            "plan" if command.is_none() => command = Some(CliCommand::Plan),
            "merge" if command.is_none() => command = Some(CliCommand::Merge),
            "subset" if command.is_none() => command = Some(CliCommand::Subset),
            "--json" => options.json = true,
            "--overwrite" => options.overwrite = true,
            "--no-backup" => options.no_backup = true,
            "--fast-update" => options.fast_update = true,
            "--base" => options.base = Some(PathBuf::from(next_value(args, &mut i, arg)?)),
            "--out" => options.out = Some(PathBuf::from(next_value(args, &mut i, arg)?)),
            "--donor" => options.donors.push(parse_donor(next_value(args, &mut i, arg)?)?),
            "--target" => {
                let value = next_value(args, &mut i, arg)?;
                let target = value
                    .parse::<u32>()
                    .map_err(|_| format!("Invalid target version: {}", value))?;
                options.target = Some(target);
            }
            "--policy" => {
                let value = next_value(args, &mut i, arg)?;
                options.policy = value.parse::<CollisionPolicy>().map_err(|e| e.to_string())?;
            }
            "--songs" => options.songs.extend(parse_song_ids(next_value(args, &mut i, arg)?)?),
            "--prefer" => {
                let (song_id, label) = parse_route(next_value(args, &mut i, arg)?)?;
                options.prefer.insert(song_id, label);
            }
            _ => return Err(format!("Unknown argument: {}", arg)),
        }
        i += 1;
    }

    let command = command.ok_or_else(|| {
        "No command specified. Use: plan, merge, or subset".to_string()
    })?;
    if options.base.is_none() {
        return Err("--base is required".to_string());
    }
    if command != CliCommand::Plan && options.out.is_none() {
        return Err("--out is required".to_string());
    }
    if command == CliCommand::Subset && options.songs.is_empty() {
        return Err("subset requires --songs".to_string());
    }

    Ok((command, options))
}

/// `label=path`, or a bare path labelled by its folder name
fn parse_donor(s: &str) -> Result<DonorArg, String> {
    if let Some((label, path)) = s.split_once('=') {
        let label = label.trim();
        if !label.is_empty() && !path.is_empty() {
            return Ok(DonorArg {
                label: label.to_string(),
                path: PathBuf::from(path),
            });
        }
    }

    let path = PathBuf::from(s);
    let label = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .ok_or_else(|| format!("Invalid donor path: {}", s))?;
    Ok(DonorArg { label, path })
}

fn parse_song_ids(s: &str) -> Result<BTreeSet<u32>, String> {
    s.split(',')
        .filter(|id| !id.trim().is_empty())
        .map(|id| {
            id.trim()
                .parse::<u32>()
                .map_err(|_| format!("Invalid song ID: {}", id))
        })
        .collect()
}

fn parse_route(s: &str) -> Result<(u32, String), String> {
    let (id, label) = s
        .split_once('=')
        .ok_or_else(|| format!("Invalid route '{}'. Use: <song id>=<label>", s))?;
    let song_id = id
        .trim()
        .parse::<u32>()
        .map_err(|_| format!("Invalid song ID: {}", id))?;
    Ok((song_id, label.trim().to_string()))
}

/// Run CLI command
pub fn run(command: CliCommand, options: CliOptions) -> anyhow::Result<()> {
    let config = Config::load();
    let mut build_options = config.build_options()?;
    if let Some(target) = options.target {
        build_options = build_options.with_target_version(target);
    }

    let (base, donors) = open_inputs(&options)?;
    match command {
        CliCommand::Plan => run_plan(&base, &donors, &build_options, &options),
        CliCommand::Merge => run_merge(base, donors, build_options, &options),
        CliCommand::Subset => run_subset(base, donors, build_options, &config, &options),
    }
}

fn open_inputs(options: &CliOptions) -> anyhow::Result<(ExportDataset, Vec<ExportDataset>)> {
    let base_path = options
        .base
        .as_deref()
        .ok_or_else(|| anyhow!("--base is required"))?;
    let base = open_dataset(base_path, BASE_LABEL)?;
    let donors = options
        .donors
        .iter()
        .map(|donor| open_dataset(&donor.path, &donor.label))
        .collect::<anyhow::Result<Vec<_>>>()?;
    Ok((base, donors))
}

fn open_dataset(path: &Path, label: &str) -> anyhow::Result<ExportDataset> {
    let dataset = ExportDataset::open_path(path, label)
        .with_context(|| format!("Failed to open {} at {}", label, path.display()))?;
    for warning in &dataset.location.warnings {
        tracing::warn!("{}: {}", label, warning);
    }
    Ok(dataset)
}

fn output_path(options: &CliOptions) -> anyhow::Result<&Path> {
    options
        .out
        .as_deref()
        .ok_or_else(|| anyhow!("--out is required"))
}

fn run_plan(
    base: &ExportDataset,
    donors: &[ExportDataset],
    build_options: &BuildOptions,
    options: &CliOptions,
) -> anyhow::Result<()> {
    let report = make_plan(base, donors, build_options.target_version, options.policy)?;
    print_plan(&report, options.json)?;
    if report.has_unresolved() {
        anyhow::bail!(
            "{} unresolved duplicate song ID(s)",
            report.unresolved_duplicates.len()
        );
    }
    Ok(())
}

fn print_plan(report: &PlanReport, json: bool) -> anyhow::Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }

    println!("Merge plan (target version {}):", report.target_version);
    for summary in std::iter::once(&report.base).chain(&report.donors) {
        println!(
            "  {:<12} {} songs, bank {} of {}  ({})",
            summary.label,
            summary.song_count,
            summary.chosen_bank,
            summary.max_bank,
            summary.export_root.display()
        );
        if summary.missing_song_folders > 0 || summary.missing_melody_xml > 0 {
            println!(
                "               {} missing song folder(s), {} song(s) without melody",
                summary.missing_song_folders, summary.missing_melody_xml
            );
        }
        if summary.missing_cover_pages > 0 {
            println!(
                "               {} cover(s) pointing at a missing texture page",
                summary.missing_cover_pages
            );
        }
        for warning in &summary.warnings {
            println!("               ! {}", warning);
        }
    }
    println!();
    println!("  Merged songs:          {}", report.merged_song_count);
    println!("  Identical duplicates:  {}", report.identical_duplicates.len());
    println!("  Unresolved duplicates: {}", report.unresolved_duplicates.len());
    if !report.unresolved_duplicates.is_empty() {
        let shown: Vec<String> = report
            .unresolved_duplicates
            .iter()
            .take(20)
            .map(u32::to_string)
            .collect();
        println!("    [{}]", shown.join(", "));
    }
    if !report.notes.is_empty() {
        println!();
        for note in &report.notes {
            println!("  - {}", note);
        }
    }
    Ok(())
}

fn run_merge(
    base: ExportDataset,
    donors: Vec<ExportDataset>,
    build_options: BuildOptions,
    options: &CliOptions,
) -> anyhow::Result<()> {
    let out = output_path(options)?;
    let stats = MergeEngine::new(base, donors)
        .with_options(build_options)
        .run(out)?;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        println!("Merge Complete:");
        println!("  Output:        {}", stats.output.display());
        println!("  Songs:         {}", stats.merged_song_count);
        println!("  From base:     {}", stats.base_song_count);
        println!("  From donors:   {}", stats.donor_song_count);
        println!("  De-duplicated: {}", stats.identical_duplicates.len());
        println!("  Acts:          {}", stats.acts_count);
        println!("  Texture pages: {}", stats.texture_pages);
        println!("  Cache files:   {}", stats.cache_files);
    }
    Ok(())
}

fn run_subset(
    base: ExportDataset,
    donors: Vec<ExportDataset>,
    build_options: BuildOptions,
    config: &Config,
    options: &CliOptions,
) -> anyhow::Result<()> {
    let out = output_path(options)?;
    let report = SubsetBuilder::new(base, donors)
        .with_options(build_options)
        .with_preferred_sources(options.prefer.clone())
        .allow_overwrite(options.overwrite)
        .keep_backup(config.keep_backup && !options.no_backup)
        .fast_update(config.fast_update || options.fast_update)
        .build(out, &options.songs)?;

    if options.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Subset Complete:");
        println!("  Output:        {}", report.output.display());
        if let Some(ref backup) = report.backup {
            println!("  Backup:        {}", backup.display());
        }
        println!("  Songs:         {}", report.merged_song_count);
        for (label, ids) in &report.imported_by_source {
            println!("    {:<12} {}", label, ids.len());
        }
        println!("  Texture pages: {}", report.texture_pages_copied);
        println!("  Melody files:  {}", report.melody_files_created);
    }
    Ok(())
}

/// Print CLI help
pub fn print_help() {
    println!("discmerge v{}", env!("CARGO_PKG_VERSION"));
    println!("Merge and subset extracted disc export datasets");
    println!();
    println!("USAGE:");
    println!("    discmerge <command> --base <path> [--donor [label=]<path>]... [options]");
    println!();
    println!("COMMANDS:");
    println!("    plan                        Dry run: classify duplicate song IDs");
    println!("    merge                       Union of base and donors into a new folder");
    println!("    subset                      Build a disc holding only selected songs");
    println!();
    println!("OPTIONS:");
    println!("    --base <path>               Base disc or Export folder");
    println!("    --donor [label=]<path>      Donor dataset (repeatable)");
    println!("    --out <path>                Output folder (merge, subset)");
    println!("    --target <n>                Highest bank version to write");
    println!("    --json                      Output in JSON format");
    println!("    --policy <policy>           Plan projection: fail, prefer-base, prefer-donor");
    println!();
    println!("SUBSET OPTIONS:");
    println!("    --songs <ids>               Comma-separated song IDs");
    println!("    --prefer <id>=<label>       Take a song from a named source (repeatable)");
    println!("    --overwrite                 Replace a previous output");
    println!("    --no-backup                 Do not keep the replaced output");
    println!("    --fast-update               Seed from the previous output with hardlinks");
    println!();
    println!("EXAMPLES:");
    println!("    discmerge plan --base discs/SingStar --donor Pop=discs/Pop --json");
    println!("    discmerge merge --base discs/SingStar --donor discs/Pop --out out/All");
    println!("    discmerge subset --base discs/SingStar --donor Pop=discs/Pop \\");
    println!("        --songs 101,102,250 --prefer 250=Pop --out out/Mix --overwrite");
    println!();
    println!("Logging is controlled with RUST_LOG (default: info).");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_donor() {
        let donor = parse_donor("Pop=/discs/SingStar Pop").unwrap();
        assert_eq!(donor.label, "Pop");
        assert_eq!(donor.path, PathBuf::from("/discs/SingStar Pop"));

        let donor = parse_donor("/discs/Rocks").unwrap();
        assert_eq!(donor.label, "Rocks");
    }

    #[test]
    fn test_parse_song_ids() {
        let ids = parse_song_ids("101, 102,250").unwrap();
        assert_eq!(ids.into_iter().collect::<Vec<_>>(), vec![101, 102, 250]);
        assert!(parse_song_ids("abc").is_err());
    }

    #[test]
    fn test_parse_route() {
        assert_eq!(parse_route("250=Pop").unwrap(), (250, "Pop".to_string()));
        assert!(parse_route("250").is_err());
        assert!(parse_route("x=Pop").is_err());
    }

    #[test]
    fn test_parse_args_plan() {
        let (cmd, options) =
            parse_args(&args(&["plan", "--base", "a", "--donor", "B=b", "--json"])).unwrap();
        assert_eq!(cmd, CliCommand::Plan);
        assert!(options.json);
        assert_eq!(options.policy, CollisionPolicy::Fail);
        assert_eq!(options.donors.len(), 1);
        assert_eq!(options.donors[0].label, "B");
    }

    #[test]
    fn test_parse_args_subset() {
        let (cmd, options) = parse_args(&args(&[
            "subset",
            "--base",
            "a",
            "--out",
            "mix",
            "--songs",
            "1,2",
            "--songs",
            "3",
            "--prefer",
            "2=Pop",
            "--target",
            "4",
            "--overwrite",
            "--no-backup",
        ]))
        .unwrap();
        assert_eq!(cmd, CliCommand::Subset);
        assert_eq!(options.songs.len(), 3);
        assert_eq!(options.prefer.get(&2).map(String::as_str), Some("Pop"));
        assert_eq!(options.target, Some(4));
        assert!(options.overwrite);
        assert!(options.no_backup);
        assert!(!options.fast_update);
    }

    #[test]
    fn test_parse_args_errors() {
        assert!(parse_args(&args(&["--base", "a"])).is_err());
        assert!(parse_args(&args(&["merge", "--base", "a"])).is_err());
        assert!(parse_args(&args(&["subset", "--base", "a", "--out", "b"])).is_err());
        assert!(parse_args(&args(&["plan", "--base"])).is_err());
        assert!(parse_args(&args(&["plan", "--base", "a", "--bogus"])).is_err());
    }
}
