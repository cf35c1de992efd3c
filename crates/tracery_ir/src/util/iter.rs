/// Splits `items` by `pred`, preserving relative order in both outputs.
pub fn partition_by<T>(
    items: impl IntoIterator<Item = T>,
    mut pred: impl FnMut(&T) -> bool,
) -> (Vec<T>, Vec<T>) {
    let mut matching = Vec::new();
    let mut rest = Vec::new();
    for item in items {
        if pred(&item) {
            matching.push(item);
        } else {
            rest.push(item);
        }
    }
    (matching, rest)
}
