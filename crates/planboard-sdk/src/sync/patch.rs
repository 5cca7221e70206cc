//! 部分更新字段
//!
//! `Field::Unchanged` 表示调用方没有提供该字段（保持原值）；
//! `Field::Set(v)` 表示写入新值。可清空的字段使用 `Field<Option<T>>`，
//! 清空写作 `Field::Set(None)`，与"未提供"区分开。

/// 单个字段的更新意图
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field<T> {
    Unchanged,
    Set(T),
}

impl<T> Default for Field<T> {
    fn default() -> Self {
        Field::Unchanged
    }
}

impl<T> From<T> for Field<T> {
    fn from(value: T) -> Self {
        Field::Set(value)
    }
}

impl<T> Field<T> {
    pub fn is_set(&self) -> bool {
        matches!(self, Field::Set(_))
    }

    pub fn as_set(&self) -> Option<&T> {
        match self {
            Field::Set(v) => Some(v),
            Field::Unchanged => None,
        }
    }

    /// 写入目标（仅当 Set 时）
    pub fn apply_to(self, target: &mut T) {
        if let Field::Set(v) = self {
            *target = v;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unchanged_keeps_value() {
        let mut title = "keep".to_string();
        Field::<String>::Unchanged.apply_to(&mut title);
        assert_eq!(title, "keep");
    }

    #[test]
    fn set_none_clears_optional() {
        let mut color = Some("red".to_string());
        Field::Set(None).apply_to(&mut color);
        assert_eq!(color, None);

        let mut untouched = Some("blue".to_string());
        Field::<Option<String>>::default().apply_to(&mut untouched);
        assert_eq!(untouched.as_deref(), Some("blue"));
    }

    #[test]
    fn from_value_is_set() {
        let f: Field<u32> = 3.into();
        assert!(f.is_set());
        assert_eq!(f.as_set(), Some(&3));
    }
}
