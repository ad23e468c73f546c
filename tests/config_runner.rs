mod common;

use std::fs;

use clap::Parser;
use taskchain::cli::CliArgs;
use taskchain::config::{StorageKind, load_and_validate};
use taskchain::errors::TaskchainError;
use taskchain::runner::Runner;
use taskchain::storage::{FileStorage, MtimeStore, Storage};
use taskchain_test_utils::builders::{ConfigFileBuilder, write_config};
use tempfile::tempdir;

const SITE: &str = r#"
[config]
storage = "file"

[task.build]
requires = ["assets", "src/app.ts"]

[task.assets]
requires = ["static/logo.svg"]
"#;

#[tokio::test]
async fn configured_tasks_record_mtimes_in_file_storage() -> anyhow::Result<()> {
    common::init_tracing();
    let dir = tempdir()?;
    fs::create_dir_all(dir.path().join("src"))?;
    fs::create_dir_all(dir.path().join("static"))?;
    fs::write(dir.path().join("src/app.ts"), "let x = 1;")?;
    fs::write(dir.path().join("static/logo.svg"), "<svg/>")?;

    let cfg = load_and_validate(write_config(dir.path(), SITE))?;
    assert_eq!(cfg.config.storage, StorageKind::File);
    let base = cfg.base_path();

    let runner = Runner::from_config(&cfg);
    runner.execute("build", Some(base.as_path())).await?;

    // A fresh storage instance reads what the run persisted.
    let storage = FileStorage::new(cfg.storage_dir());
    assert!(storage.path().exists());
    let mtimes = MtimeStore::new(&storage);
    for file in ["src/app.ts", "static/logo.svg"] {
        let recorded = mtimes.get(&base.join(file)).await?;
        let on_disk = fs::metadata(base.join(file))?.modified()?;
        assert_eq!(recorded, Some(on_disk), "{file}");
    }
    Ok(())
}

#[tokio::test]
async fn missing_required_files_are_not_fatal() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let cfg = ConfigFileBuilder::new()
        .with_task("build", &["src/missing.ts"])
        .with_origin(dir.path())
        .build();

    let task = Runner::from_config(&cfg)
        .execute("build", Some(cfg.base_path().as_path()))
        .await?;
    assert_eq!(task.name().name(), "build");
    Ok(())
}

#[test]
fn invalid_configs_are_rejected_on_load() {
    let dir = tempdir().unwrap();

    let cycle = write_config(
        dir.path(),
        "[task.a]\nrequires = [\"b\"]\n[task.b]\nrequires = [\"a\"]\n",
    );
    assert!(matches!(
        load_and_validate(&cycle),
        Err(TaskchainError::RequiresCycle(_))
    ));

    let unknown = write_config(dir.path(), "[task.a]\nrequires = [\"nope\"]\n");
    assert!(matches!(
        load_and_validate(&unknown),
        Err(TaskchainError::ConfigError(_))
    ));

    let broken = write_config(dir.path(), "[task.a\n");
    assert!(matches!(
        load_and_validate(&broken),
        Err(TaskchainError::TomlError(_))
    ));

    let missing = dir.path().join("absent.toml");
    assert!(matches!(
        load_and_validate(&missing),
        Err(TaskchainError::IoError(_))
    ));
}

#[tokio::test]
async fn run_executes_the_root_task_once_without_watch() -> anyhow::Result<()> {
    let dir = tempdir()?;
    fs::create_dir_all(dir.path().join("src"))?;
    fs::write(dir.path().join("src/app.ts"), "x")?;
    let config = write_config(dir.path(), SITE).to_string_lossy().into_owned();

    let args = CliArgs::try_parse_from(["taskchain", "--config", config.as_str()])?;
    taskchain::run(args).await?;

    assert!(dir.path().join(".taskchain/storage.json").exists());
    Ok(())
}

#[tokio::test]
async fn dry_run_touches_nothing() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let config = write_config(dir.path(), SITE).to_string_lossy().into_owned();

    let args = CliArgs::try_parse_from(["taskchain", "--dry-run", "--config", config.as_str()])?;
    taskchain::run(args).await?;

    assert!(!dir.path().join(".taskchain").exists());
    Ok(())
}

#[tokio::test]
async fn clean_forgets_previous_runs() -> anyhow::Result<()> {
    let dir = tempdir()?;
    fs::create_dir_all(dir.path().join("src"))?;
    fs::write(dir.path().join("src/app.ts"), "x")?;
    let config_path = write_config(dir.path(), SITE);
    let cfg = load_and_validate(&config_path)?;

    let stale = FileStorage::new(cfg.storage_dir());
    stale.set("!mtime!/gone.ts", "\"stale\"".to_string()).await?;

    let config = config_path.to_string_lossy().into_owned();
    let args = CliArgs::try_parse_from(["taskchain", "--clean", "--config", config.as_str()])?;
    taskchain::run(args).await?;

    let storage = FileStorage::new(cfg.storage_dir());
    assert_eq!(storage.get("!mtime!/gone.ts").await?, None);
    let recorded = MtimeStore::new(&storage)
        .get(&cfg.base_path().join("src/app.ts"))
        .await?;
    assert!(recorded.is_some());
    Ok(())
}
