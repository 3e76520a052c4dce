//! Identity helpers
//!
//! National identity cards are 18 characters; student registration numbers
//! are 19 characters made of a one-letter prefix and the card.

const ID_CARD_LEN: usize = 18;
const STUDENT_ID_LEN: usize = 19;

const CHECK_WEIGHTS: [u32; 17] = [7, 9, 10, 5, 8, 4, 2, 1, 6, 3, 7, 9, 10, 5, 8, 4, 2];
const CHECK_DIGITS: [char; 11] = ['1', '0', 'X', '9', '8', '7', '6', '5', '4', '3', '2'];

/// Prefix given to registration numbers derived from a bare card
pub const STUDENT_ID_PREFIX: char = 'G';

/// Validate an 18 character identity card against its check digit
pub fn is_valid_id_card(card: &str) -> bool {
    if card.len() != ID_CARD_LEN || !card.is_ascii() {
        return false;
    }
    let bytes = card.as_bytes();
    let mut sum = 0u32;
    for (i, weight) in CHECK_WEIGHTS.iter().enumerate() {
        let b = bytes[i];
        if !b.is_ascii_digit() {
            return false;
        }
        sum += (b - b'0') as u32 * weight;
    }
    let expected = CHECK_DIGITS[(sum % 11) as usize];
    (bytes[17] as char).eq_ignore_ascii_case(&expected)
}

/// Split a submitted card into `(id_card, registration_number)`.
///
/// A 19 character registration number yields its card suffix; an 18
/// character card yields a `G`-prefixed registration number. Anything else
/// yields two empty strings.
pub fn split_card(card: &str) -> (String, String) {
    let card = card.trim();
    if !card.is_ascii() {
        return (String::new(), String::new());
    }
    match card.len() {
        STUDENT_ID_LEN => (card[1..].to_string(), card.to_string()),
        ID_CARD_LEN => (card.to_string(), format!("{}{}", STUDENT_ID_PREFIX, card)),
        _ => (String::new(), String::new()),
    }
}

/// Extract the `YYYYMMDD` birthday embedded in a card or registration number
pub fn birthday(id_card: &str, sid: &str) -> Option<String> {
    if sid.len() == STUDENT_ID_LEN && sid.is_ascii() {
        return Some(sid[7..15].to_string());
    }
    if id_card.len() == ID_CARD_LEN && id_card.is_ascii() {
        return Some(id_card[6..14].to_string());
    }
    None
}

/// Split a comma separated phone list, dropping blanks
pub fn parse_phones(phones: &str) -> Vec<String> {
    phones
        .split(',')
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .map(String::from)
        .collect()
}
