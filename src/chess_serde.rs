pub mod position_serde {
    use std::str::FromStr;

    use serde::{
        de::{Error, Visitor},
        Deserializer, Serializer,
    };
    use shakmaty::{fen::Fen, CastlingMode, Chess};

    pub fn serialize<S: Serializer>(b: &Chess, ser: S) -> Result<S::Ok, S::Error> {
        let fen = Fen::from_position(b.clone(), shakmaty::EnPassantMode::Legal);
        ser.serialize_str(&fen.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Chess, D::Error> {
        struct ChessVisitor {}
        impl<'de> Visitor<'de> for ChessVisitor {
            type Value = Chess;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(formatter, "a position in the FEN format")
            }
            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                let fen =
                    Fen::from_str(v).map_err(|_| Error::custom("error in parsing board's FEN"))?;
                // Shredder castling rights only parse in Chess960 mode
                fen.clone()
                    .into_position(CastlingMode::Standard)
                    .or_else(|_| fen.into_position(CastlingMode::Chess960))
                    .map_err(|v| {
                        Error::custom(format!("error in parsing FEN into game position: {v}"))
                    })
            }
        }
        d.deserialize_string(ChessVisitor {})
    }
}

pub mod uci_serde {
    use std::str::FromStr;

    use serde::{
        de::{Error, Visitor},
        Deserializer, Serializer,
    };
    use shakmaty::uci::Uci;

    pub fn serialize<S: Serializer>(u: &Uci, ser: S) -> Result<S::Ok, S::Error> {
        ser.serialize_str(&u.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Uci, D::Error> {
        struct UciVisitor {}
        impl<'de> Visitor<'de> for UciVisitor {
            type Value = Uci;

            fn expecting(&self, formatter: &mut std::fmt::Formatter) -> std::fmt::Result {
                write!(formatter, "a move in the UCI format")
            }
            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Uci::from_str(v).map_err(|_| Error::custom("error in parsing move's UCI"))
            }
        }
        d.deserialize_string(UciVisitor {})
    }
}

/// Optional move, `null` when absent.
pub mod option_uci_serde {
    use std::str::FromStr;

    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use shakmaty::uci::Uci;

    pub fn serialize<S: Serializer>(u: &Option<Uci>, ser: S) -> Result<S::Ok, S::Error> {
        match u {
            Some(u) => ser.serialize_some(&u.to_string()),
            None => ser.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Uci>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|s| Uci::from_str(&s).map_err(|_| Error::custom("error in parsing move's UCI")))
            .transpose()
    }
}

/// Move sequence as a list of UCI strings.
pub mod uci_list_serde {
    use std::str::FromStr;

    use serde::{de::Error, ser::SerializeSeq, Deserialize, Deserializer, Serializer};
    use shakmaty::uci::Uci;

    pub fn serialize<S: Serializer>(moves: &[Uci], ser: S) -> Result<S::Ok, S::Error> {
        let mut seq = ser.serialize_seq(Some(moves.len()))?;
        for u in moves {
            seq.serialize_element(&u.to_string())?;
        }
        seq.end()
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Uci>, D::Error> {
        Vec::<String>::deserialize(d)?
            .iter()
            .map(|s| Uci::from_str(s).map_err(|_| Error::custom("error in parsing move's UCI")))
            .collect()
    }
}
