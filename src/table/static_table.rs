use std::collections::HashMap;

use lazy_static::lazy_static;

pub const STATIC_TABLE_LEN: usize = 61;

/// Entry at the given 0-based static index.
pub fn get_static(index: u64) -> Option<(&'static [u8], &'static [u8])> {
    let v = STATIC_TABLE_RAW.get(index as usize)?;
    Some((v.0.as_bytes(), v.1.as_bytes()))
}

/// Best static match for the header: the exact (name, value) index if
/// one exists, otherwise the lowest index carrying the name.
pub fn find_static(name: &[u8], value: &[u8]) -> Option<(u64, bool)> {
    let (first, values) = STATIC_HASH.get(name)?;
    if let Some(index) = values.get(value) {
        return Some((*index as u64, true));
    }
    Some((*first as u64, false))
}

/// (HPACK, Appendix A), 0-based for this codec's addressing.
static STATIC_TABLE_RAW: &'static [(&'static str, &'static str)] = &[
    (":authority", ""),
    (":method", "GET"),
    (":method", "POST"),
    (":path", "/"),
    (":path", "/index.html"),
    (":scheme", "http"),
    (":scheme", "https"),
    (":status", "200"),
    (":status", "204"),
    (":status", "206"),
    (":status", "304"),
    (":status", "400"),
    (":status", "404"),
    (":status", "500"),
    ("accept-charset", ""),
    ("accept-encoding", "gzip, deflate"),
    ("accept-language", ""),
    ("accept-ranges", ""),
    ("accept", ""),
    ("access-control-allow-origin", ""),
    ("age", ""),
    ("allow", ""),
    ("authorization", ""),
    ("cache-control", ""),
    ("content-disposition", ""),
    ("content-encoding", ""),
    ("content-language", ""),
    ("content-length", ""),
    ("content-location", ""),
    ("content-range", ""),
    ("content-type", ""),
    ("cookie", ""),
    ("date", ""),
    ("etag", ""),
    ("expect", ""),
    ("expires", ""),
    ("from", ""),
    ("host", ""),
    ("if-match", ""),
    ("if-modified-since", ""),
    ("if-none-match", ""),
    ("if-range", ""),
    ("if-unmodified-since", ""),
    ("last-modified", ""),
    ("link", ""),
    ("location", ""),
    ("max-forwards", ""),
    ("proxy-authenticate", ""),
    ("proxy-authorization", ""),
    ("range", ""),
    ("referer", ""),
    ("refresh", ""),
    ("retry-after", ""),
    ("server", ""),
    ("set-cookie", ""),
    ("strict-transport-security", ""),
    ("transfer-encoding", ""),
    ("user-agent", ""),
    ("vary", ""),
    ("via", ""),
    ("www-authenticate", ""),
];

lazy_static! {
    static ref STATIC_HASH: HashMap<&'static [u8], (usize, HashMap<&'static [u8], usize>)> = {
        let mut h = HashMap::<&'static [u8], (usize, HashMap<&'static [u8], usize>)>::new();
        for (idx, &(name, value)) in STATIC_TABLE_RAW.iter().enumerate() {
            let slot = h
                .entry(name.as_bytes())
                .or_insert_with(|| (idx, HashMap::new()));
            slot.1.insert(value.as_bytes(), idx);
        }
        h
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_get() {
        assert_eq!(get_static(0), Some((&b":authority"[..], &b""[..])));
        assert_eq!(get_static(1), Some((&b":method"[..], &b"GET"[..])));
        assert_eq!(get_static(60), Some((&b"www-authenticate"[..], &b""[..])));
        assert_eq!(get_static(STATIC_TABLE_LEN as u64), None);
        assert_eq!(STATIC_TABLE_RAW.len(), STATIC_TABLE_LEN);
    }

    #[test]
    fn test_find_exact() {
        assert_eq!(find_static(b":method", b"POST"), Some((2, true)));
        assert_eq!(find_static(b":status", b"404"), Some((12, true)));
    }

    #[test]
    fn test_find_name_only() {
        assert_eq!(find_static(b":status", b"999"), Some((7, false)));
        assert_eq!(find_static(b"server", b"sws"), Some((53, false)));
        assert_eq!(find_static(b"name1", b"value1"), None);
    }
}
