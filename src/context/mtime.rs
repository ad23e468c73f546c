// src/context/mtime.rs

//! The mtime marker: the last modification time the framework knows about
//! for a task.
//!
//! This can differ from the OS mtime. A dependency resolver may raise it
//! above the file's own mtime, and logical tasks have no OS mtime at all.

use std::time::SystemTime;

use crate::context::Context;
use crate::errors::Result;
use crate::storage::MtimeStore;
use crate::task::{Task, TaskName};

/// Reconcile the known mtime of `task`, in priority order:
/// 1. the marker stashed in the task state,
/// 2. the file-system mtime of a file-backed task,
/// 3. the marker persisted in storage.
pub async fn get_mtime(task: &Task, context: &Context) -> Result<Option<SystemTime>> {
    if let Some(mtime) = task.state().mtime {
        return Ok(Some(mtime));
    }
    let TaskName::File(file) = task.name() else {
        return Ok(None);
    };
    if let Ok(mtime) = context.fs().modified(file.path()).await {
        return Ok(Some(mtime));
    }
    MtimeStore::new(context.storage()).get(file.path()).await
}

/// Return a copy of `task` carrying `mtime` as its marker. With a context and
/// a file-backed name, the marker is persisted to storage as well.
pub async fn set_mtime(
    task: &Task,
    mtime: SystemTime,
    context: Option<&Context>,
) -> Result<Task> {
    let updated = task.with_mtime(mtime);
    if let (Some(context), TaskName::File(file)) = (context, task.name()) {
        MtimeStore::new(context.storage())
            .set(file.path(), mtime)
            .await?;
    }
    Ok(updated)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::mock::MockFileSystem;
    use crate::storage::MemoryStorage;
    use std::path::Path;
    use std::sync::Arc;
    use std::time::Duration;

    fn context(fs: &MockFileSystem) -> Context {
        Context::new(
            "/p",
            Vec::new().into(),
            Arc::new(MemoryStorage::new()),
            Arc::new(fs.clone()),
        )
    }

    #[tokio::test]
    async fn state_wins_over_disk_and_storage() -> Result<()> {
        let fs = MockFileSystem::new();
        let on_disk = fs.add_file("/p/a.c", "int x;");
        let ctx = context(&fs);
        let task = Task::file("a.c", Some(Path::new("/p")));

        assert_eq!(get_mtime(&task, &ctx).await?, Some(on_disk));

        let stashed = on_disk + Duration::from_secs(100);
        assert_eq!(get_mtime(&task.with_mtime(stashed), &ctx).await?, Some(stashed));
        Ok(())
    }

    #[tokio::test]
    async fn storage_is_the_fallback_for_missing_files() -> Result<()> {
        let fs = MockFileSystem::new();
        let ctx = context(&fs);
        let task = Task::file("/p/gone.o", None);
        assert_eq!(get_mtime(&task, &ctx).await?, None);

        let recorded = SystemTime::UNIX_EPOCH + Duration::from_secs(7);
        let updated = set_mtime(&task, recorded, Some(&ctx)).await?;
        assert_eq!(updated.state().mtime, Some(recorded));
        assert_eq!(task.state().mtime, None);
        assert_eq!(get_mtime(&task, &ctx).await?, Some(recorded));
        Ok(())
    }

    #[tokio::test]
    async fn logical_tasks_only_use_state() -> Result<()> {
        let fs = MockFileSystem::new();
        let ctx = context(&fs);
        let task = Task::logical("build");
        let recorded = SystemTime::UNIX_EPOCH + Duration::from_secs(3);

        let updated = set_mtime(&task, recorded, Some(&ctx)).await?;

        assert_eq!(get_mtime(&task, &ctx).await?, None);
        assert_eq!(get_mtime(&updated, &ctx).await?, Some(recorded));
        Ok(())
    }
}
