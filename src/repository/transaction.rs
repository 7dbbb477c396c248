// ==========================================
// 表格数据导入引擎 - 事务作用域
// ==========================================
// 职责: 以保存点包裹一段写入，保证每条退出路径都释放
// 约束: commit/rollback 消费 self；未结束的作用域在 Drop 时回滚
// ==========================================

use crate::repository::entity_store::EntityStore;
use crate::repository::error::RepositoryResult;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, warn};

static SCOPE_SEQ: AtomicU64 = AtomicU64::new(1);

/// 保存点守卫
pub struct TransactionScope<'s, S: EntityStore + ?Sized> {
    store: &'s S,
    name: String,
    finished: bool,
}

impl<'s, S: EntityStore + ?Sized> TransactionScope<'s, S> {
    /// 打开保存点（名称 = label + 进程内序号）
    pub fn open(store: &'s S, label: &str) -> RepositoryResult<Self> {
        let name = format!("{}_{}", label, SCOPE_SEQ.fetch_add(1, Ordering::Relaxed));
        store.savepoint(&name)?;
        debug!(savepoint = %name, "保存点已打开");
        Ok(Self {
            store,
            name,
            finished: false,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 释放保存点（写入并入外层事务）
    pub fn commit(mut self) -> RepositoryResult<()> {
        self.finished = true;
        self.store.release_savepoint(&self.name)?;
        debug!(savepoint = %self.name, "保存点已提交");
        Ok(())
    }

    /// 回滚并释放保存点
    pub fn rollback(mut self) -> RepositoryResult<()> {
        self.finished = true;
        self.store.rollback_to_savepoint(&self.name)?;
        self.store.release_savepoint(&self.name)?;
        debug!(savepoint = %self.name, "保存点已回滚");
        Ok(())
    }
}

impl<'s, S: EntityStore + ?Sized> Drop for TransactionScope<'s, S> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        warn!(savepoint = %self.name, "保存点未显式结束，执行回滚");
        if let Err(e) = self.store.rollback_to_savepoint(&self.name) {
            warn!(savepoint = %self.name, error = %e, "保存点回滚失败");
        }
        if let Err(e) = self.store.release_savepoint(&self.name) {
            warn!(savepoint = %self.name, error = %e, "保存点释放失败");
        }
    }
}
