//! Character set conversion for ensemble, service and dynamic labels.
//!
//! Labels announce their charset in a four bit field. Broadcasts almost
//! always use the EBU Latin based repertoire, with UCS-2 and UTF-8 as the
//! defined alternatives.

/// Charset identifiers carried by label fields.
pub const CHARSET_EBU_LATIN: u8 = 0b0000;
pub const CHARSET_UCS2: u8 = 0b0110;
pub const CHARSET_UTF8: u8 = 0b1111;

/// The EBU Latin based repertoire mapped onto Unicode.
#[rustfmt::skip]
static EBU_LATIN_TABLE: [char; 256] = [
    '\0','Ę','Į','Ų','Ă','Ė','Ď','Ș','Ț','Ċ','\n','\u{b}','Ġ','Ĺ','Ż','Ń',
    'ą','ę','į','ų','ă','ė','ď','ș','ț','ċ','Ň','Ě','ġ','ĺ','ż','ń',
    ' ','!','"','#','ł','%','&','\'','(',')','*','+',',','-','.','/',
    '0','1','2','3','4','5','6','7','8','9',':',';','<','=','>','?',
    '@','A','B','C','D','E','F','G','H','I','J','K','L','M','N','O',
    'P','Q','R','S','T','U','V','W','X','Y','Z','[','Ů',']','Ł','_',
    'Ą','a','b','c','d','e','f','g','h','i','j','k','l','m','n','o',
    'p','q','r','s','t','u','v','w','x','y','z','«','ů','»','Ľ','Ħ',
    'á','à','é','è','í','ì','ó','ò','ú','ù','Ñ','Ç','Ş','ß','¡','Ÿ',
    'â','ä','ê','ë','î','ï','ô','ö','û','ü','ñ','ç','ş','ğ','ı','ÿ',
    'Ķ','Ņ','©','Ģ','Ğ','ě','ň','ő','Ő','€','£','$','Ā','Ē','Ī','Ū',
    'ĸ','ņ','Ļ','ģ','ļ','ń','ű','Ű','¿','ľ','°','¼','½','¾','§','±',
    'Á','À','É','È','Í','Ì','Ó','Ò','Ú','Ù','Ř','Č','Š','Ž','Đ','Ŀ',
    'Â','Ä','Ê','Ë','Î','Ï','Ô','Ö','Û','Ü','ř','č','š','ž','đ','ŀ',
    'Ã','Å','Æ','Œ','Ŷ','Ý','Õ','Ø','Þ','Ŋ','Ŕ','Ć','Ś','Ź','Ŧ','ð',
    'ã','å','æ','œ','ŵ','ý','õ','ø','þ','ŋ','ŕ','ć','ś','ź','ŧ','ħ',
];

/// Converts label bytes in the announced charset to a trimmed UTF-8 string.
/// Unknown charsets fall back to the EBU Latin table since that is what the
/// overwhelming majority of broadcasts use.
pub fn convert_label_to_utf8(charset: u8, buf: &[u8]) -> String {
    let label = match charset {
        CHARSET_UCS2 => buf
            .chunks_exact(2)
            .map(|pair| u16::from_be_bytes([pair[0], pair[1]]))
            .take_while(|value| *value != 0)
            .map(|value| char::from_u32(value as u32).unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect::<String>(),
        CHARSET_UTF8 => String::from_utf8_lossy(buf).into_owned(),
        _ => buf
            .iter()
            .take_while(|byte| **byte != 0)
            .map(|byte| EBU_LATIN_TABLE[*byte as usize])
            .collect::<String>(),
    };
    label.trim_end().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ascii_subset_passes_through() {
        let label = convert_label_to_utf8(CHARSET_EBU_LATIN, b"BBC Radio 4     ");
        assert_eq!(label, "BBC Radio 4");
    }

    #[test]
    fn accented_ebu_bytes_are_mapped() {
        let label = convert_label_to_utf8(CHARSET_EBU_LATIN, &[0x80, 0x8D, 0x20]);
        assert_eq!(label, "áß");
    }

    #[test]
    fn ucs2_and_utf8_labels_decode() {
        let ucs2 = [0x00, 0x44, 0x00, 0x41, 0x00, 0x42, 0x00, 0x2B];
        assert_eq!(convert_label_to_utf8(CHARSET_UCS2, &ucs2), "DAB+");
        assert_eq!(convert_label_to_utf8(CHARSET_UTF8, "Rádio".as_bytes()), "Rádio");
    }
}
