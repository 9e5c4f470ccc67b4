pub struct Helper;

impl Helper {
    /// 十六进制字符串转字节数组, 空格分隔可有可无
    pub fn hex_to_vec(s: &str) -> Vec<u8> {
        let mut result = vec![];
        let bytes = s.as_bytes();
        let mut val = 0;
        let mut is_first = true;
        for b in bytes {
            if b != &b' ' {
                if is_first {
                    val = u8::from_str_radix(std::str::from_utf8(&[*b]).unwrap(), 16).unwrap();
                    is_first = false
                } else {
                    val = val * 16 + u8::from_str_radix(std::str::from_utf8(&[*b]).unwrap(), 16).unwrap();
                    result.push(val);
                    val = 0;
                    is_first = true;
                }
            }
        }
        result
    }
}
