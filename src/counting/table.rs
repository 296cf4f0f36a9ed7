//! 分类别进出计数表

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// 单个类别的进/出计数
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassCounts {
    #[serde(rename = "IN")]
    pub entered: u64,
    #[serde(rename = "OUT")]
    pub exited: u64,
}

impl ClassCounts {
    pub fn new(entered: u64, exited: u64) -> Self {
        Self { entered, exited }
    }

    pub fn total(&self) -> u64 {
        self.entered + self.exited
    }
}

/// 类别名 → (进, 出), 按名称排序
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ClassCountTable(BTreeMap<String, ClassCounts>);

impl ClassCountTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// 登记类别 (已存在则不变)
    pub fn observe(&mut self, label: &str) {
        self.0.entry(label.to_string()).or_default();
    }

    pub fn record_in(&mut self, label: &str) {
        self.0.entry(label.to_string()).or_default().entered += 1;
    }

    pub fn record_out(&mut self, label: &str) {
        self.0.entry(label.to_string()).or_default().exited += 1;
    }

    /// 直接设置某类别的计数
    pub fn set(&mut self, label: &str, counts: ClassCounts) {
        self.0.insert(label.to_string(), counts);
    }

    pub fn get(&self, label: &str) -> Option<ClassCounts> {
        self.0.get(label).copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ClassCounts)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn total_in(&self) -> u64 {
        self.0.values().map(|c| c.entered).sum()
    }

    pub fn total_out(&self) -> u64 {
        self.0.values().map(|c| c.exited).sum()
    }

    pub fn total(&self) -> u64 {
        self.total_in() + self.total_out()
    }

    /// 逐类别累加增量
    pub fn add(&self, delta: &ClassCountTable) -> ClassCountTable {
        let mut sum = self.clone();
        for (label, d) in delta.iter() {
            let entry = sum.0.entry(label.to_string()).or_default();
            entry.entered += d.entered;
            entry.exited += d.exited;
        }
        sum
    }

    /// 逐字段取最大值,并返回是否有字段被抬高
    pub fn max_with(&self, floor: &ClassCountTable) -> (ClassCountTable, bool) {
        let mut merged = self.clone();
        let mut raised = false;
        for (label, f) in floor.iter() {
            let entry = merged.0.entry(label.to_string()).or_default();
            if entry.entered < f.entered {
                entry.entered = f.entered;
                raised = true;
            }
            if entry.exited < f.exited {
                entry.exited = f.exited;
                raised = true;
            }
        }
        (merged, raised)
    }

    /// 每个类别的每个字段都不小于 `previous`
    pub fn dominates(&self, previous: &ClassCountTable) -> bool {
        previous.iter().all(|(label, p)| {
            self.get(label)
                .map(|c| c.entered >= p.entered && c.exited >= p.exited)
                .unwrap_or(false)
        })
    }
}

impl<S: Into<String>> FromIterator<(S, ClassCounts)> for ClassCountTable {
    fn from_iter<I: IntoIterator<Item = (S, ClassCounts)>>(iter: I) -> Self {
        Self(iter.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_and_totals() {
        let mut table = ClassCountTable::new();
        table.observe("truck");
        table.record_in("car");
        table.record_in("car");
        table.record_out("bus");

        assert_eq!(table.get("truck"), Some(ClassCounts::new(0, 0)));
        assert_eq!(table.get("car"), Some(ClassCounts::new(2, 0)));
        assert_eq!((table.total_in(), table.total_out(), table.total()), (2, 1, 3));

        let labels: Vec<&str> = table.iter().map(|(l, _)| l).collect();
        assert_eq!(labels, vec!["bus", "car", "truck"]);
    }

    #[test]
    fn test_add_and_max_with() {
        let base: ClassCountTable = [("car", ClassCounts::new(3, 1))].into_iter().collect();
        let delta: ClassCountTable = [("car", ClassCounts::new(1, 0)), ("bus", ClassCounts::new(0, 2))]
            .into_iter()
            .collect();

        let sum = base.add(&delta);
        assert_eq!(sum.get("car"), Some(ClassCounts::new(4, 1)));
        assert_eq!(sum.get("bus"), Some(ClassCounts::new(0, 2)));
        assert!(sum.dominates(&base));

        let lower: ClassCountTable = [("car", ClassCounts::new(2, 5))].into_iter().collect();
        assert!(!lower.dominates(&base));
        let (clamped, raised) = lower.max_with(&base);
        assert!(raised);
        assert_eq!(clamped.get("car"), Some(ClassCounts::new(3, 5)));

        let (same, raised) = sum.max_with(&base);
        assert!(!raised);
        assert_eq!(same, sum);
    }

    #[test]
    fn test_json_shape() {
        let table: ClassCountTable = [("car", ClassCounts::new(3, 1))].into_iter().collect();
        assert_eq!(
            serde_json::to_string(&table).unwrap(),
            r#"{"car":{"IN":3,"OUT":1}}"#
        );
    }
}
