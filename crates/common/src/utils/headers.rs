use http::HeaderMap;
use std::collections::HashMap;

/// Convert HTTP headers to the tunnel's single-valued header map.
/// Repeated headers are joined with ", "; values that are not valid UTF-8 are dropped.
pub fn headers_to_map(headers: &HeaderMap) -> HashMap<String, String> {
    let mut map: HashMap<String, String> = HashMap::new();

    for (name, value) in headers.iter() {
        let Ok(val) = value.to_str() else {
            continue;
        };

        map.entry(name.as_str().to_string())
            .and_modify(|existing| {
                existing.push_str(", ");
                existing.push_str(val);
            })
            .or_insert_with(|| val.to_string());
    }

    map
}
