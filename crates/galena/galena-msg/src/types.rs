//! Per-version FIX tag dictionaries.
//!
//! The RX iterator needs two lookups to scan a frame: the `tag → type` map
//! (so it can recognize length-prefix fields) and the subset of tags whose
//! type is `data`, because a data value may contain the field separator and
//! must be skipped by the byte count from its companion length field. Both
//! are owned per parser instance, built once at construction; there is no
//! process-global dictionary.

use crate::version::FixVersion;
use std::collections::{HashMap, HashSet};

/// FIX field data types as of 5.0 SP2. Earlier versions simply use fewer
/// of them.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FixType {
    Int,
    Length,
    TagNum,
    SeqNum,
    NumInGroup,
    DayOfMonth,
    Float,
    Qty,
    Price,
    PriceOffset,
    Amt,
    Percentage,
    Char,
    Boolean,
    String,
    MultipleCharValue,
    MultipleStringValue,
    Country,
    Currency,
    Exchange,
    MonthYear,
    UtcTimestamp,
    UtcTimeOnly,
    UtcDateOnly,
    LocalMktDate,
    TzTimeOnly,
    TzTimestamp,
    Data,
    Pattern,
    Tenor,
    XmlData,
    Language,
}

use FixType::*;

/// Tags shared by every supported version (the 4.0 base dictionary, which
/// later versions only extend for our purposes).
const BASE_TAGS: &[(u32, FixType)] = &[
    (1, String),         // Account
    (6, Price),          // AvgPx
    (7, SeqNum),         // BeginSeqNo
    (8, String),         // BeginString
    (9, Length),         // BodyLength
    (10, String),        // CheckSum
    (11, String),        // ClOrdID
    (14, Qty),           // CumQty
    (15, Currency),      // Currency
    (16, SeqNum),        // EndSeqNo
    (17, String),        // ExecID
    (31, Price),         // LastPx
    (32, Qty),           // LastQty
    (34, SeqNum),        // MsgSeqNum
    (35, String),        // MsgType
    (36, SeqNum),        // NewSeqNo
    (37, String),        // OrderID
    (38, Qty),           // OrderQty
    (39, Char),          // OrdStatus
    (40, Char),          // OrdType
    (41, String),        // OrigClOrdID
    (43, Boolean),       // PossDupFlag
    (44, Price),         // Price
    (45, SeqNum),        // RefSeqNum
    (48, String),        // SecurityID
    (49, String),        // SenderCompID
    (50, String),        // SenderSubID
    (52, UtcTimestamp),  // SendingTime
    (54, Char),          // Side
    (55, String),        // Symbol
    (56, String),        // TargetCompID
    (57, String),        // TargetSubID
    (58, String),        // Text
    (59, Char),          // TimeInForce
    (60, UtcTimestamp),  // TransactTime
    (89, Data),          // Signature
    (90, Length),        // SecureDataLen
    (91, Data),          // SecureData
    (93, Length),        // SignatureLength
    (95, Length),        // RawDataLength
    (96, Data),          // RawData
    (97, Boolean),       // PossResend
    (98, Int),           // EncryptMethod
    (108, Int),          // HeartBtInt
    (112, String),       // TestReqID
    (115, String),       // OnBehalfOfCompID
    (122, UtcTimestamp), // OrigSendingTime
    (123, Boolean),      // GapFillFlag
];

/// Added in 4.1.
const FIX41_TAGS: &[(u32, FixType)] = &[
    (141, Boolean), // ResetSeqNumFlag
];

/// Added in 4.2, notably the encoded-field data pairs.
const FIX42_TAGS: &[(u32, FixType)] = &[
    (212, Length),  // XmlDataLen
    (213, Data),    // XmlData
    (347, String),  // MessageEncoding
    (350, Length),  // EncodedIssuerLen
    (351, Data),    // EncodedIssuer
    (354, Length),  // EncodedTextLen
    (355, Data),    // EncodedText
    (369, SeqNum),  // LastMsgSeqNumProcessed
    (371, TagNum),  // RefTagID
    (372, String),  // RefMsgType
    (373, Int),     // SessionRejectReason
];

/// Added in 4.3: the hop repeating group on the standard header.
const FIX43_TAGS: &[(u32, FixType)] = &[
    (627, NumInGroup),   // NoHops
    (628, String),       // HopCompID
    (629, UtcTimestamp), // HopSendingTime
    (630, SeqNum),       // HopRefID
];

/// FIXT.1.1 / FIX 5.x transport additions.
const FIXT11_TAGS: &[(u32, FixType)] = &[
    (1128, String), // ApplVerID
    (1129, String), // CustomApplVerID
    (1137, String), // DefaultApplVerID
];

/// The two lookup sets, owned by whichever parser instance needs them.
#[derive(Debug)]
pub struct TypeTables {
    tags: HashMap<u32, FixType>,
    data_tags: HashSet<u32>,
}

impl TypeTables {
    /// Builds the dictionary for `version`. `Custom` gets the full 5.x
    /// dictionary so that custom protocols can reuse every standard tag.
    pub fn new(version: FixVersion) -> Self {
        let mut tables = Self {
            tags: HashMap::new(),
            data_tags: HashSet::new(),
        };
        let layers: &[&[(u32, FixType)]] = match version {
            FixVersion::Fix40 => &[BASE_TAGS],
            FixVersion::Fix41 => &[BASE_TAGS, FIX41_TAGS],
            FixVersion::Fix42 => &[BASE_TAGS, FIX41_TAGS, FIX42_TAGS],
            FixVersion::Fix43 | FixVersion::Fix44 => {
                &[BASE_TAGS, FIX41_TAGS, FIX42_TAGS, FIX43_TAGS]
            }
            FixVersion::Fix50
            | FixVersion::Fix50Sp1
            | FixVersion::Fix50Sp2
            | FixVersion::Fixt11
            | FixVersion::Custom => {
                &[BASE_TAGS, FIX41_TAGS, FIX42_TAGS, FIX43_TAGS, FIXT11_TAGS]
            }
        };
        for layer in layers {
            for &(tag, ty) in *layer {
                tables.insert(tag, ty);
            }
        }
        tables
    }

    /// Registers a tag, keeping the data-tag subset consistent. Used both
    /// by construction and by custom-tag registration on the RX parser.
    pub fn insert(&mut self, tag: u32, ty: FixType) {
        self.tags.insert(tag, ty);
        if ty == Data {
            self.data_tags.insert(tag);
        } else {
            self.data_tags.remove(&tag);
        }
    }

    /// Declared type of `tag`, if known.
    #[inline]
    pub fn type_of(&self, tag: u32) -> Option<FixType> {
        self.tags.get(&tag).copied()
    }

    /// Whether a tag's value length comes from the preceding length field.
    #[inline]
    pub fn is_data_tag(&self, tag: u32) -> bool {
        self.data_tags.contains(&tag)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn data_subset_tracks_types() {
        let t = TypeTables::new(FixVersion::Fix44);
        assert!(t.is_data_tag(96));
        assert!(t.is_data_tag(355));
        assert!(!t.is_data_tag(95));
        assert_eq!(t.type_of(95), Some(FixType::Length));
        assert_eq!(t.type_of(9), Some(FixType::Length));
    }

    #[test]
    fn version_layering() {
        let old = TypeTables::new(FixVersion::Fix40);
        assert_eq!(old.type_of(355), None);
        assert_eq!(old.type_of(96), Some(FixType::Data));

        let new = TypeTables::new(FixVersion::Fixt11);
        assert_eq!(new.type_of(1128), Some(FixType::String));
        assert_eq!(new.type_of(355), Some(FixType::Data));
    }

    #[test]
    fn custom_tags_can_extend_and_override() {
        let mut t = TypeTables::new(FixVersion::Fix42);
        t.insert(20001, FixType::Data);
        assert!(t.is_data_tag(20001));
        t.insert(20001, FixType::String);
        assert!(!t.is_data_tag(20001));
    }
}
