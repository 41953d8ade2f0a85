//! Wire protocol shared by the server and its clients.
//!
//! Frames are newline-terminated lines of comma-separated fields. The first
//! field is a single-character command code; the remaining fields are
//! arguments. Free-form text (chat, signs) is always the last argument and
//! may itself contain commas.

pub const PROTOCOL_VERSION: i64 = 2;
pub const CHUNK_SIZE: i32 = 16;
pub const MAX_LOCAL_PLAYERS: usize = 4;
pub const MAX_SIGN_LENGTH: usize = 256;

/// Chunk coordinate that contains the world coordinate `x`.
pub fn chunked(x: i32) -> i32 {
    x.div_euclid(CHUNK_SIZE)
}

/// Position and view direction of one player.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Pose {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub rx: f32,
    pub ry: f32,
}

impl Pose {
    pub const fn new(x: f32, y: f32, z: f32, rx: f32, ry: f32) -> Self {
        Self { x, y, z, rx, ry }
    }
}

/// Rate-limiting bucket a raw inbound frame is charged against. Position
/// updates arrive far more often than anything else, so they get their own
/// budget. Classified from the leading byte, before decoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RateCategory {
    Position,
    General,
}

pub fn rate_category(frame: &str) -> RateCategory {
    if frame.starts_with('P') {
        RateCategory::Position
    } else {
        RateCategory::General
    }
}

/// Client-to-server command, decoded from one frame.
///
/// Decoding is strict about arity and numeric fields: a frame with an
/// unknown code, a missing or extra argument, or an unparsable number
/// yields `None` and is dropped by the caller.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    Version { version: i64 },
    Authenticate { username: String, access_token: String },
    Chunk { p: i32, q: i32, key: u64 },
    Block { x: i32, y: i32, z: i32, w: i32 },
    Extra { x: i32, y: i32, z: i32, w: i32 },
    Light { x: i32, y: i32, z: i32, w: i32 },
    Shape { x: i32, y: i32, z: i32, w: i32 },
    Transform { x: i32, y: i32, z: i32, w: i32 },
    Sign { x: i32, y: i32, z: i32, face: i32, text: String },
    Position { player: usize, pose: Pose },
    Add { player: usize },
    Remove { player: usize },
    Talk { text: String },
    Nick { player: usize, nick: Option<String> },
    Spawn { player: usize },
    Goto { player: usize, nick: Option<String> },
    Pq { player: usize, p: i32, q: i32 },
    Event { player: usize, x: i32, y: i32, z: i32, face: i32 },
}

impl Command {
    pub fn decode(frame: &str) -> Option<Command> {
        let mut fields = frame.split(',');
        let code = fields.next()?;
        let args: Vec<&str> = fields.collect();
        match code {
            "V" => match args.as_slice() {
                [version] => Some(Command::Version {
                    version: version.parse().ok()?,
                }),
                _ => None,
            },
            "A" => match args.as_slice() {
                [username, access_token] => Some(Command::Authenticate {
                    username: username.to_string(),
                    access_token: access_token.to_string(),
                }),
                _ => None,
            },
            "C" => match args.as_slice() {
                [p, q] => Some(Command::Chunk {
                    p: p.parse().ok()?,
                    q: q.parse().ok()?,
                    key: 0,
                }),
                [p, q, key] => Some(Command::Chunk {
                    p: p.parse().ok()?,
                    q: q.parse().ok()?,
                    key: key.parse().ok()?,
                }),
                _ => None,
            },
            "B" => decode_cell(&args).map(|(x, y, z, w)| Command::Block { x, y, z, w }),
            "e" => decode_cell(&args).map(|(x, y, z, w)| Command::Extra { x, y, z, w }),
            "L" => decode_cell(&args).map(|(x, y, z, w)| Command::Light { x, y, z, w }),
            "s" => decode_cell(&args).map(|(x, y, z, w)| Command::Shape { x, y, z, w }),
            "t" => decode_cell(&args).map(|(x, y, z, w)| Command::Transform { x, y, z, w }),
            "S" => match args.as_slice() {
                [x, y, z, face, text @ ..] => Some(Command::Sign {
                    x: x.parse().ok()?,
                    y: y.parse().ok()?,
                    z: z.parse().ok()?,
                    face: face.parse().ok()?,
                    text: text.join(","),
                }),
                _ => None,
            },
            "P" => match args.as_slice() {
                [player, x, y, z, rx, ry] => Some(Command::Position {
                    player: player.parse().ok()?,
                    pose: Pose::new(
                        x.parse().ok()?,
                        y.parse().ok()?,
                        z.parse().ok()?,
                        rx.parse().ok()?,
                        ry.parse().ok()?,
                    ),
                }),
                _ => None,
            },
            "F" => match args.as_slice() {
                [player] => Some(Command::Add {
                    player: player.parse().ok()?,
                }),
                _ => None,
            },
            "X" => match args.as_slice() {
                [player] => Some(Command::Remove {
                    player: player.parse().ok()?,
                }),
                _ => None,
            },
            "T" => Some(Command::Talk { text: args.join(",") }),
            "N" => match args.as_slice() {
                [player] => Some(Command::Nick {
                    player: player.parse().ok()?,
                    nick: None,
                }),
                [player, nick] => Some(Command::Nick {
                    player: player.parse().ok()?,
                    nick: Some(nick.to_string()),
                }),
                _ => None,
            },
            "W" => match args.as_slice() {
                [player] => Some(Command::Spawn {
                    player: player.parse().ok()?,
                }),
                _ => None,
            },
            "G" => match args.as_slice() {
                [player] => Some(Command::Goto {
                    player: player.parse().ok()?,
                    nick: None,
                }),
                [player, nick] => Some(Command::Goto {
                    player: player.parse().ok()?,
                    nick: Some(nick.to_string()),
                }),
                _ => None,
            },
            "Q" => match args.as_slice() {
                [player, p, q] => Some(Command::Pq {
                    player: player.parse().ok()?,
                    p: p.parse().ok()?,
                    q: q.parse().ok()?,
                }),
                _ => None,
            },
            "v" => match args.as_slice() {
                [player, x, y, z, face] => Some(Command::Event {
                    player: player.parse().ok()?,
                    x: x.parse().ok()?,
                    y: y.parse().ok()?,
                    z: z.parse().ok()?,
                    face: face.parse().ok()?,
                }),
                _ => None,
            },
            _ => None,
        }
    }
}

fn decode_cell(args: &[&str]) -> Option<(i32, i32, i32, i32)> {
    match args {
        [x, y, z, w] => Some((
            x.parse().ok()?,
            y.parse().ok()?,
            z.parse().ok()?,
            w.parse().ok()?,
        )),
        _ => None,
    }
}

/// Server-to-client packet. `encode` renders the newline-terminated frame.
#[derive(Debug, Clone, PartialEq)]
pub enum Packet {
    Block { p: i32, q: i32, x: i32, y: i32, z: i32, w: i32 },
    Extra { p: i32, q: i32, x: i32, y: i32, z: i32, w: i32 },
    Light { p: i32, q: i32, x: i32, y: i32, z: i32, w: i32 },
    Shape { p: i32, q: i32, x: i32, y: i32, z: i32, w: i32 },
    Transform { p: i32, q: i32, x: i32, y: i32, z: i32, w: i32 },
    Sign { p: i32, q: i32, x: i32, y: i32, z: i32, face: i32, text: String },
    Key { p: i32, q: i32, key: u64 },
    Redraw { p: i32, q: i32 },
    ChunkDone { p: i32, q: i32 },
    Time { time: f64, day_length: u32 },
    Talk { text: String },
    You { client_id: u32, player: usize, pose: Pose },
    Position { client_id: u32, player: usize, pose: Pose },
    Nick { client_id: u32, player: usize, nick: String },
    Disconnect { client_id: u32 },
    Add { client_id: u32, player: usize },
    Remove { client_id: u32, player: usize },
    Option { name: String, value: String },
}

impl Packet {
    pub fn encode(&self) -> String {
        match self {
            Packet::Block { p, q, x, y, z, w } => {
                format!("B,{},{},{},{},{},{}\n", p, q, x, y, z, w)
            }
            Packet::Extra { p, q, x, y, z, w } => {
                format!("e,{},{},{},{},{},{}\n", p, q, x, y, z, w)
            }
            Packet::Light { p, q, x, y, z, w } => {
                format!("L,{},{},{},{},{},{}\n", p, q, x, y, z, w)
            }
            Packet::Shape { p, q, x, y, z, w } => {
                format!("s,{},{},{},{},{},{}\n", p, q, x, y, z, w)
            }
            Packet::Transform { p, q, x, y, z, w } => {
                format!("t,{},{},{},{},{},{}\n", p, q, x, y, z, w)
            }
            Packet::Sign { p, q, x, y, z, face, text } => {
                format!("S,{},{},{},{},{},{},{}\n", p, q, x, y, z, face, text)
            }
            Packet::Key { p, q, key } => format!("K,{},{},{}\n", p, q, key),
            Packet::Redraw { p, q } => format!("R,{},{}\n", p, q),
            Packet::ChunkDone { p, q } => format!("C,{},{}\n", p, q),
            Packet::Time { time, day_length } => format!("E,{},{}\n", time, day_length),
            Packet::Talk { text } => format!("T,{}\n", text),
            Packet::You { client_id, player, pose } => format!(
                "U,{},{},{},{},{},{},{}\n",
                client_id, player, pose.x, pose.y, pose.z, pose.rx, pose.ry
            ),
            Packet::Position { client_id, player, pose } => format!(
                "P,{},{},{},{},{},{},{}\n",
                client_id, player, pose.x, pose.y, pose.z, pose.rx, pose.ry
            ),
            Packet::Nick { client_id, player, nick } => {
                format!("N,{},{},{}\n", client_id, player, nick)
            }
            Packet::Disconnect { client_id } => format!("D,{}\n", client_id),
            Packet::Add { client_id, player } => format!("F,{},{}\n", client_id, player),
            Packet::Remove { client_id, player } => format!("X,{},{}\n", client_id, player),
            Packet::Option { name, value } => format!("O,{},{}\n", name, value),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_approx_eq::assert_approx_eq;

    #[test]
    fn test_chunked_boundaries() {
        assert_eq!(chunked(0), 0);
        assert_eq!(chunked(15), 0);
        assert_eq!(chunked(16), 1);
        assert_eq!(chunked(31), 1);
        assert_eq!(chunked(32), 2);
        assert_eq!(chunked(-1), -1);
        assert_eq!(chunked(-16), -1);
        assert_eq!(chunked(-17), -2);
    }

    #[test]
    fn test_decode_version() {
        assert_eq!(
            Command::decode("V,2"),
            Some(Command::Version { version: 2 })
        );
        assert_eq!(
            Command::decode("V,-1"),
            Some(Command::Version { version: -1 })
        );
        assert_eq!(Command::decode("V"), None);
        assert_eq!(Command::decode("V,2,3"), None);
        assert_eq!(Command::decode("V,two"), None);
    }

    #[test]
    fn test_decode_authenticate() {
        assert_eq!(
            Command::decode("A,alice,token123"),
            Some(Command::Authenticate {
                username: "alice".to_string(),
                access_token: "token123".to_string(),
            })
        );
        // Empty token is still two fields.
        assert_eq!(
            Command::decode("A,alice,"),
            Some(Command::Authenticate {
                username: "alice".to_string(),
                access_token: String::new(),
            })
        );
        assert_eq!(Command::decode("A,alice"), None);
        assert_eq!(Command::decode("A,alice,tok,extra"), None);
    }

    #[test]
    fn test_decode_block() {
        assert_eq!(
            Command::decode("B,10,20,30,5"),
            Some(Command::Block { x: 10, y: 20, z: 30, w: 5 })
        );
        assert_eq!(
            Command::decode("B,-3,1,-4,0"),
            Some(Command::Block { x: -3, y: 1, z: -4, w: 0 })
        );
        assert_eq!(Command::decode("B,10,20,30"), None);
        assert_eq!(Command::decode("B,10,20,30,5,6"), None);
        assert_eq!(Command::decode("B,a,b,c,d"), None);
    }

    #[test]
    fn test_decode_rejects_unknown_code() {
        assert_eq!(Command::decode("Z,1,2"), None);
        assert_eq!(Command::decode("BX,1,2,3,4"), None);
        assert_eq!(Command::decode(""), None);
    }

    #[test]
    fn test_decode_chunk_key_defaults_to_zero() {
        assert_eq!(
            Command::decode("C,3,-2"),
            Some(Command::Chunk { p: 3, q: -2, key: 0 })
        );
        assert_eq!(
            Command::decode("C,3,-2,77"),
            Some(Command::Chunk { p: 3, q: -2, key: 77 })
        );
        assert_eq!(Command::decode("C,3"), None);
        assert_eq!(Command::decode("C,3,-2,77,9"), None);
    }

    #[test]
    fn test_decode_talk_preserves_commas() {
        assert_eq!(
            Command::decode("T,hello, world"),
            Some(Command::Talk { text: "hello, world".to_string() })
        );
        assert_eq!(
            Command::decode("T"),
            Some(Command::Talk { text: String::new() })
        );
    }

    #[test]
    fn test_decode_sign_text() {
        assert_eq!(
            Command::decode("S,1,2,3,0,left, right"),
            Some(Command::Sign {
                x: 1,
                y: 2,
                z: 3,
                face: 0,
                text: "left, right".to_string(),
            })
        );
        // Exactly four arguments means an empty text, which deletes the sign.
        assert_eq!(
            Command::decode("S,1,2,3,0"),
            Some(Command::Sign {
                x: 1,
                y: 2,
                z: 3,
                face: 0,
                text: String::new(),
            })
        );
        assert_eq!(Command::decode("S,1,2,3"), None);
    }

    #[test]
    fn test_decode_position() {
        let command = Command::decode("P,1,12.5,0.25,-8,90,-45.5").unwrap();
        match command {
            Command::Position { player, pose } => {
                assert_eq!(player, 1);
                assert_approx_eq!(pose.x, 12.5, 1e-6);
                assert_approx_eq!(pose.y, 0.25, 1e-6);
                assert_approx_eq!(pose.z, -8.0, 1e-6);
                assert_approx_eq!(pose.rx, 90.0, 1e-6);
                assert_approx_eq!(pose.ry, -45.5, 1e-6);
            }
            other => panic!("decoded wrong command: {:?}", other),
        }
        assert_eq!(Command::decode("P,1,2,3,4,5"), None);
        // Negative slots never parse; they would index no player anyway.
        assert_eq!(Command::decode("P,-1,0,0,0,0,0"), None);
    }

    #[test]
    fn test_decode_nick_get_and_set() {
        assert_eq!(
            Command::decode("N,1"),
            Some(Command::Nick { player: 1, nick: None })
        );
        assert_eq!(
            Command::decode("N,2,steve"),
            Some(Command::Nick { player: 2, nick: Some("steve".to_string()) })
        );
        assert_eq!(Command::decode("N,2,a,b"), None);
    }

    #[test]
    fn test_decode_goto_optional_nick() {
        assert_eq!(
            Command::decode("G,1"),
            Some(Command::Goto { player: 1, nick: None })
        );
        assert_eq!(
            Command::decode("G,1,alice"),
            Some(Command::Goto { player: 1, nick: Some("alice".to_string()) })
        );
    }

    #[test]
    fn test_decode_teleport_and_event() {
        assert_eq!(
            Command::decode("Q,1,5,-7"),
            Some(Command::Pq { player: 1, p: 5, q: -7 })
        );
        assert_eq!(
            Command::decode("v,1,10,20,30,3"),
            Some(Command::Event { player: 1, x: 10, y: 20, z: 30, face: 3 })
        );
        assert_eq!(Command::decode("Q,1,5"), None);
        assert_eq!(Command::decode("v,1,10,20,30"), None);
    }

    #[test]
    fn test_encode_block() {
        let packet = Packet::Block { p: 0, q: 0, x: 0, y: 1, z: 0, w: 5 };
        assert_eq!(packet.encode(), "B,0,0,0,1,0,5\n");
        let ghost = Packet::Block { p: -1, q: 0, x: 0, y: 1, z: 0, w: -5 };
        assert_eq!(ghost.encode(), "B,-1,0,0,1,0,-5\n");
    }

    #[test]
    fn test_encode_chunk_markers() {
        assert_eq!(Packet::Key { p: 2, q: -3, key: 42 }.encode(), "K,2,-3,42\n");
        assert_eq!(Packet::Redraw { p: 2, q: -3 }.encode(), "R,2,-3\n");
        assert_eq!(Packet::ChunkDone { p: 2, q: -3 }.encode(), "C,2,-3\n");
    }

    #[test]
    fn test_encode_pose_packets() {
        let pose = Pose::new(16.0, 0.0, -32.0, 0.0, 0.0);
        assert_eq!(
            Packet::You { client_id: 1, player: 1, pose }.encode(),
            "U,1,1,16,0,-32,0,0\n"
        );
        assert_eq!(
            Packet::Position { client_id: 7, player: 2, pose }.encode(),
            "P,7,2,16,0,-32,0,0\n"
        );
    }

    #[test]
    fn test_encode_sign_keeps_text_verbatim() {
        let packet = Packet::Sign {
            p: 0,
            q: 0,
            x: 1,
            y: 2,
            z: 3,
            face: 4,
            text: "hello, world".to_string(),
        };
        assert_eq!(packet.encode(), "S,0,0,1,2,3,4,hello, world\n");
    }

    #[test]
    fn test_encode_roster_packets() {
        assert_eq!(
            Packet::Nick { client_id: 3, player: 1, nick: "guest3-1".to_string() }.encode(),
            "N,3,1,guest3-1\n"
        );
        assert_eq!(Packet::Disconnect { client_id: 3 }.encode(), "D,3\n");
        assert_eq!(Packet::Add { client_id: 3, player: 2 }.encode(), "F,3,2\n");
        assert_eq!(Packet::Remove { client_id: 3, player: 2 }.encode(), "X,3,2\n");
        assert_eq!(
            Packet::Option { name: "show-clouds".to_string(), value: "1".to_string() }.encode(),
            "O,show-clouds,1\n"
        );
    }

    #[test]
    fn test_rate_category_from_first_byte() {
        assert_eq!(rate_category("P,1,0,0,0,0,0"), RateCategory::Position);
        assert_eq!(rate_category("B,0,1,0,5"), RateCategory::General);
        assert_eq!(rate_category("T,P is a letter"), RateCategory::General);
    }

    #[test]
    fn test_decode_encode_agree_on_cell_kinds() {
        for (line, code) in [
            ("e,1,2,3,4", "e"),
            ("L,1,2,3,4", "L"),
            ("s,1,2,3,4", "s"),
            ("t,1,2,3,4", "t"),
        ] {
            let decoded = Command::decode(line);
            assert!(decoded.is_some(), "failed to decode {}", code);
        }
        assert_eq!(
            Packet::Extra { p: 0, q: 0, x: 1, y: 2, z: 3, w: 4 }.encode(),
            "e,0,0,1,2,3,4\n"
        );
        assert_eq!(
            Packet::Light { p: 0, q: 0, x: 1, y: 2, z: 3, w: 4 }.encode(),
            "L,0,0,1,2,3,4\n"
        );
        assert_eq!(
            Packet::Shape { p: 0, q: 0, x: 1, y: 2, z: 3, w: 4 }.encode(),
            "s,0,0,1,2,3,4\n"
        );
        assert_eq!(
            Packet::Transform { p: 0, q: 0, x: 1, y: 2, z: 3, w: 4 }.encode(),
            "t,0,0,1,2,3,4\n"
        );
    }
}
