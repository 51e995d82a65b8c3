/// Returns a clone of `value` unless it is [`None`] or holds the zero value of
/// `T` (an empty string, an empty map, `0`), in which case `default()` is
/// evaluated instead.
///
/// Resource fields are frequently written as `image: ""` or `labels: {}` by
/// templating tools, and those must behave exactly like an omitted field.
///
/// ```
/// # use vault_operator::utils::with_default;
/// let unset: Option<String> = None;
/// let empty = Some(String::new());
/// let custom = Some("hashicorp/vault:1.15.2".to_owned());
///
/// let default = || "hashicorp/vault:latest".to_owned();
/// assert_eq!(with_default(unset.as_ref(), default), "hashicorp/vault:latest");
/// assert_eq!(with_default(empty.as_ref(), default), "hashicorp/vault:latest");
/// assert_eq!(with_default(custom.as_ref(), default), "hashicorp/vault:1.15.2");
/// ```
pub fn with_default<T>(value: Option<&T>, default: impl FnOnce() -> T) -> T
where
    T: Clone + Default + PartialEq,
{
    match value {
        Some(value) if *value != T::default() => value.clone(),
        _ => default(),
    }
}
