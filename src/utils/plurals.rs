/// `singular` for a count of one, otherwise `plural` or `singular` + "s".
pub fn pluralize(count: u64, singular: &str, plural: Option<&str>) -> String {
    match (count, plural) {
        (1, _) => singular.to_string(),
        (_, Some(plural)) => plural.to_string(),
        (_, None) => format!("{singular}s"),
    }
}
