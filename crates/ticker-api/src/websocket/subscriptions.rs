//! 심볼 구독 역인덱스.
//!
//! 심볼 → 구독 연결 집합. 연결 레지스트리의 락 안에서만 변경되며
//! 각 연결이 가진 심볼 집합과 항상 양방향으로 일치합니다.

use std::collections::{BTreeSet, HashMap, HashSet};

use super::connection::ConnectionId;

/// 심볼 구독 인덱스.
///
/// 구독자가 0명인 항목은 남겨두지 않습니다.
#[derive(Debug, Default)]
pub struct SubscriptionIndex {
    entries: HashMap<String, HashSet<ConnectionId>>,
}

impl SubscriptionIndex {
    /// 빈 인덱스 생성.
    pub fn new() -> Self {
        Self::default()
    }

    /// 구독 추가.
    ///
    /// # Returns
    ///
    /// 새로 추가되었으면 `true`
    pub fn insert(&mut self, symbol: &str, id: ConnectionId) -> bool {
        self.entries.entry(symbol.to_string()).or_default().insert(id)
    }

    /// 구독 제거. 마지막 구독자가 빠지면 항목도 삭제합니다.
    ///
    /// # Returns
    ///
    /// 실제로 제거되었으면 `true`
    pub fn remove(&mut self, symbol: &str, id: &ConnectionId) -> bool {
        let Some(members) = self.entries.get_mut(symbol) else {
            return false;
        };

        let removed = members.remove(id);
        if members.is_empty() {
            self.entries.remove(symbol);
        }
        removed
    }

    /// 심볼의 구독자 집합.
    pub fn subscribers(&self, symbol: &str) -> Option<&HashSet<ConnectionId>> {
        self.entries.get(symbol)
    }

    /// 구독자가 1명 이상인 심볼 목록.
    pub fn active_symbols(&self) -> BTreeSet<String> {
        self.entries.keys().cloned().collect()
    }

    /// 심볼의 구독자 수.
    pub fn subscriber_count(&self, symbol: &str) -> usize {
        self.entries.get(symbol).map_or(0, HashSet::len)
    }

    /// 심볼이 구독 중인지 여부.
    pub fn contains(&self, symbol: &str, id: &ConnectionId) -> bool {
        self.entries
            .get(symbol)
            .is_some_and(|members| members.contains(id))
    }

    /// (심볼, 구독자 집합) 순회.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &HashSet<ConnectionId>)> {
        self.entries.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_is_idempotent() {
        let mut index = SubscriptionIndex::new();
        let id = ConnectionId::new();

        assert!(index.insert("AAPL", id));
        assert!(!index.insert("AAPL", id));
        assert_eq!(index.subscriber_count("AAPL"), 1);
    }

    #[test]
    fn test_last_removal_deletes_entry() {
        let mut index = SubscriptionIndex::new();
        let a = ConnectionId::new();
        let b = ConnectionId::new();

        index.insert("MSFT", a);
        index.insert("MSFT", b);

        assert!(index.remove("MSFT", &a));
        assert_eq!(index.active_symbols().len(), 1);

        assert!(index.remove("MSFT", &b));
        assert!(index.subscribers("MSFT").is_none());
        assert!(index.active_symbols().is_empty());

        // 이미 없는 구독 제거는 무시
        assert!(!index.remove("MSFT", &b));
    }

    #[test]
    fn test_active_symbols_sorted() {
        let mut index = SubscriptionIndex::new();
        let id = ConnectionId::new();

        index.insert("TSLA", id);
        index.insert("AAPL", id);
        index.insert("MSFT", id);

        let symbols: Vec<String> = index.active_symbols().into_iter().collect();
        assert_eq!(symbols, vec!["AAPL", "MSFT", "TSLA"]);
        assert!(index.contains("AAPL", &id));
        assert!(!index.contains("NVDA", &id));
    }
}
