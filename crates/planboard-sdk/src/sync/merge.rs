//! 合并算法（Last-Write-Wins）
//!
//! 按 id 对齐本地与远端两个集合：
//! - 两边都有：`updated_at` 较新的一方整条胜出（不做字段级合并），相等时保留本地
//! - 只在远端：直接采用
//! - 只在本地：原样保留（可能是尚未推送的新建）
//!
//! 合并后重新计算 `is_synced`：远端胜出的记录不落后于任何本地修改，标记为已同步；
//! 本地胜出的记录保留自身的标记，未确认的本地修改继续留在待推送队列。
//!
//! 纯函数：不读时钟，输出按 id 排序，相同输入必然得到相同输出。
//!
//! 已知局限：整条 LWW，不同客户端并发修改不同字段时会丢掉一方的修改。

use std::collections::BTreeMap;

use super::entity::SyncEntity;

/// 合并本地与远端集合
pub fn merge<E: SyncEntity>(local: &[E], remote: &[E]) -> Vec<E> {
    let mut merged: BTreeMap<String, E> = BTreeMap::new();

    for item in local {
        match merged.get(item.id()) {
            Some(existing) if existing.updated_at() >= item.updated_at() => {}
            _ => {
                merged.insert(item.id().to_string(), item.clone());
            }
        }
    }

    for incoming in remote {
        match merged.get(incoming.id()) {
            // 相等时本地优先：它代表一次尚未在远端体现的本地修改
            Some(current) if current.updated_at() >= incoming.updated_at() => {}
            _ => {
                let mut adopted = incoming.clone();
                adopted.meta_mut().is_synced = true;
                merged.insert(incoming.id().to_string(), adopted);
            }
        }
    }

    merged.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::tag::Tag;
    use std::collections::HashSet;

    fn tag(id: &str, updated_at: i64, name: &str, is_synced: bool) -> Tag {
        let mut t = Tag::with_meta(id, updated_at, name);
        t.meta.is_synced = is_synced;
        t
    }

    #[test]
    fn later_updated_at_wins() {
        let local = vec![tag("T1", 100, "A", true)];
        let remote = vec![tag("T1", 200, "B", false)];
        let merged = merge(&local, &remote);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].name, "B");
        assert_eq!(merged[0].meta.updated_at, 200);
        assert!(merged[0].meta.is_synced);

        let local = vec![tag("T1", 300, "newer local", false)];
        let merged = merge(&local, &remote);
        assert_eq!(merged[0].name, "newer local");
        assert!(!merged[0].meta.is_synced);
    }

    #[test]
    fn tie_keeps_local_copy() {
        let local = vec![tag("T1", 100, "local", false)];
        let remote = vec![tag("T1", 100, "remote", true)];
        let merged = merge(&local, &remote);
        assert_eq!(merged[0].name, "local");
        // 仍未确认的本地修改不能因为合并被标记为已同步
        assert!(!merged[0].meta.is_synced);
    }

    #[test]
    fn union_of_ids_without_duplicates() {
        let local = vec![
            tag("a", 1, "a", true),
            tag("b", 1, "b", false),
            tag("c", 5, "c", true),
        ];
        let remote = vec![tag("c", 6, "c2", true), tag("d", 1, "d", true)];
        let merged = merge(&local, &remote);

        let ids: Vec<&str> = merged.iter().map(|t| t.meta.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c", "d"]);
        let unique: HashSet<&str> = ids.iter().copied().collect();
        assert_eq!(unique.len(), merged.len());
    }

    #[test]
    fn remote_only_is_adopted_as_synced_and_local_only_is_retained() {
        let local = vec![tag("new", 10, "unsent creation", false)];
        let remote = vec![tag("other", 5, "from server", false)];
        let merged = merge(&local, &remote);

        let new = merged.iter().find(|t| t.meta.id == "new").unwrap();
        assert!(!new.meta.is_synced);
        let other = merged.iter().find(|t| t.meta.id == "other").unwrap();
        assert!(other.meta.is_synced);
    }

    #[test]
    fn merge_is_deterministic() {
        let local = vec![tag("x", 3, "x", true), tag("y", 9, "y", false)];
        let remote = vec![tag("y", 8, "y-old", true), tag("z", 1, "z", true)];
        let first = merge(&local, &remote);
        let second = merge(&local, &remote);
        assert_eq!(first, second);
    }

    #[test]
    fn merging_merged_result_again_is_stable() {
        let local = vec![tag("T1", 100, "A", false), tag("T2", 50, "local", false)];
        let remote = vec![tag("T1", 200, "B", true), tag("T3", 10, "r", true)];
        let once = merge(&local, &remote);
        let twice = merge(&once, &remote);
        assert_eq!(once, twice);
    }
}
