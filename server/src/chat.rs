//! Chat: broadcast messages, private messages and the server side of the
//! slash commands.
//!
//! Most slash commands advertised by `/help` run inside the client; the
//! server only answers `/help` and `/list` and bounces everything else.

use crate::connection::ConnId;
use crate::model::{Client, Model};
use log::debug;

impl Model {
    pub(crate) fn on_talk(&self, conn: ConnId, text: String) {
        if text.starts_with('/') {
            self.on_command(conn, &text);
        } else if text.starts_with('@') {
            self.on_private_message(conn, &text);
        } else {
            let sender = match self.chat_nick(conn) {
                Some(nick) => nick,
                None => return,
            };
            self.send_talk(&format!("{}> {}", sender, text));
        }
    }

    fn on_command(&self, conn: ConnId, text: &str) {
        if text == "/help" {
            self.on_help(conn, None);
        } else if let Some(topic) = help_topic(text) {
            self.on_help(conn, Some(topic));
        } else if text == "/list" {
            self.on_list(conn);
        } else {
            self.reply(conn, &format!("Unrecognized command: \"{}\"", text));
        }
    }

    fn on_help(&self, conn: ConnId, topic: Option<&str>) {
        let topic = match topic {
            None => {
                self.reply(conn, "Type \"t\" to chat. Type \"/\" to type commands:");
                self.reply(
                    conn,
                    "/goto [NAME], /help [TOPIC], /list, /login NAME, /logout, /nick",
                );
                self.reply(
                    conn,
                    "/offline [FILE], /online HOST [PORT], /pq P Q, /spawn, /view N",
                );
                return;
            }
            Some(topic) => topic.to_lowercase(),
        };
        let lines: &[&str] = match topic.as_str() {
            "goto" => &[
                "Help: /goto [NAME]",
                "Teleport to another user.",
                "If NAME is unspecified, a random user is chosen.",
            ],
            "list" => &["Help: /list", "Display a list of connected users."],
            "login" => &[
                "Help: /login NAME",
                "Switch to another registered username.",
                "The login server will be re-contacted. The username is case-sensitive.",
            ],
            "logout" => &[
                "Help: /logout",
                "Unauthenticate and become a guest user.",
                "Automatic logins will not occur again until the /login command is re-issued.",
            ],
            "offline" => &[
                "Help: /offline [FILE]",
                "Switch to offline mode.",
                "FILE specifies the save file to use and defaults to \"world\".",
            ],
            "online" => &[
                "Help: /online HOST [PORT]",
                "Connect to the specified server.",
            ],
            "nick" => &["Help: /nick [NICK]", "Get or set your nickname."],
            "pq" => &["Help: /pq P Q", "Teleport to the specified chunk."],
            "spawn" => &["Help: /spawn", "Teleport back to the spawn point."],
            "view" => &["Help: /view N", "Set viewing distance, 1 - 24."],
            _ => &[], // unknown topics get no reply
        };
        for line in lines {
            self.reply(conn, line);
        }
    }

    fn on_list(&self, conn: ConnId) {
        let mut clients: Vec<&Client> = self.clients.values().collect();
        clients.sort_by_key(|client| client.client_id);
        let names: Vec<&str> = clients
            .iter()
            .flat_map(|client| client.active_players().map(|local| local.nick.as_str()))
            .collect();
        self.reply(conn, &format!("Players: {}", names.join(", ")));
    }

    /// `@nick ...` goes to the sender and the addressed client. The nick
    /// is matched against chat identities, scanning clients in id order.
    fn on_private_message(&self, conn: ConnId, text: &str) {
        let target_nick = text[1..].split(' ').next().unwrap_or("");
        let target = {
            let mut clients: Vec<(ConnId, &Client)> = self
                .clients
                .iter()
                .map(|(&id, client)| (id, client))
                .collect();
            clients.sort_by_key(|(_, client)| client.client_id);
            clients
                .into_iter()
                .find(|(_, client)| client.nick.as_deref() == Some(target_nick))
                .map(|(id, _)| id)
        };
        match target {
            Some(target_conn) => {
                let sender = match self.chat_nick(conn) {
                    Some(nick) => nick,
                    None => return,
                };
                let message = format!("{}> {}", sender, text);
                self.reply(conn, &message);
                self.reply(target_conn, &message);
            }
            None => {
                self.reply(conn, &format!("Unrecognized nick: \"{}\"", target_nick));
            }
        }
    }

    /// The sender's chat identity. Unauthenticated connections have none,
    /// and their messages are dropped.
    fn chat_nick(&self, conn: ConnId) -> Option<String> {
        let client = self.clients.get(&conn)?;
        if client.nick.is_none() {
            debug!("dropping chat from unauthenticated connection {}", conn);
        }
        client.nick.clone()
    }
}

/// Extracts the topic from `/help TOPIC`: whitespace, then one bare word,
/// nothing trailing.
fn help_topic(text: &str) -> Option<&str> {
    let rest = text.strip_prefix("/help")?;
    let topic = rest.trim_start();
    if topic.len() == rest.len() {
        return None; // no separating whitespace, e.g. "/helpful"
    }
    if topic.is_empty() || topic.contains(char::is_whitespace) {
        return None;
    }
    Some(topic)
}
