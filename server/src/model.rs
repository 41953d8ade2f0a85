//! The authoritative world model.
//!
//! A single task owns every piece of mutable state and consumes the event
//! queue that all connections feed. Commands take effect strictly in
//! dequeue order, which is what makes concurrent edits safe without
//! locks: the model applies one command at a time against current state
//! and broadcasts the outcome. Socket tasks never see world state and the
//! model never blocks on a socket.

use crate::config::Config;
use crate::connection::{ConnId, ConnectionHandle, Event};
use crate::store::{Decoration, HistoryRow, Store};
use crate::world::Generator;
use log::{debug, error, info, warn};
use rand::seq::SliceRandom;
use shared::{chunked, Command, Packet, Pose, CHUNK_SIZE, MAX_LOCAL_PLAYERS, PROTOCOL_VERSION};
use std::collections::HashMap;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::time::timeout;

/// How long the model waits on an empty queue before checking whether a
/// commit is due.
const QUEUE_WAIT: Duration = Duration::from_secs(5);

/// One slot of a connection's local splitscreen players.
pub(crate) struct LocalPlayer {
    pub(crate) nick: String,
    pub(crate) pose: Pose,
    pub(crate) active: bool,
}

/// A connected client as the model sees it. `nick` is the chat identity
/// and stays unset until the client authenticates; the per-slot nicks in
/// `players` are what other clients render.
pub(crate) struct Client {
    pub(crate) client_id: u32,
    pub(crate) handle: ConnectionHandle,
    pub(crate) version: Option<i64>,
    pub(crate) user_id: Option<u64>,
    pub(crate) nick: Option<String>,
    pub(crate) players: Vec<LocalPlayer>,
}

impl Client {
    /// Local player in 1-based slot `slot`.
    fn player(&self, slot: usize) -> Option<&LocalPlayer> {
        slot.checked_sub(1).and_then(|i| self.players.get(i))
    }

    fn player_mut(&mut self, slot: usize) -> Option<&mut LocalPlayer> {
        slot.checked_sub(1).and_then(move |i| self.players.get_mut(i))
    }

    pub(crate) fn active_players(&self) -> impl Iterator<Item = &LocalPlayer> {
        self.players.iter().filter(|player| player.active)
    }
}

pub struct Model {
    pub(crate) config: Config,
    pub(crate) store: Store,
    generator: Box<dyn Generator>,
    pub(crate) clients: HashMap<ConnId, Client>,
    events: mpsc::UnboundedReceiver<Event>,
}

impl Model {
    pub fn new(
        config: Config,
        store: Store,
        generator: Box<dyn Generator>,
    ) -> (Model, mpsc::UnboundedSender<Event>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let model = Model {
            config,
            store,
            generator,
            clients: HashMap::new(),
            events: events_rx,
        };
        (model, events_tx)
    }

    /// Drains the event queue until shutdown, committing dirty state every
    /// commit interval and once more on the way out.
    pub async fn run(mut self) {
        info!("world model running");
        loop {
            match timeout(QUEUE_WAIT, self.events.recv()).await {
                Ok(Some(Event::Shutdown)) => break,
                Ok(Some(event)) => self.handle(event),
                Ok(None) => break,
                Err(_) => {}
            }
            if self.store.commit_due() {
                self.commit();
            }
        }
        self.commit();
        info!("world model stopped");
    }

    fn commit(&mut self) {
        if let Err(e) = self.store.commit() {
            error!("failed to commit world state: {}", e);
        }
    }

    fn handle(&mut self, event: Event) {
        match event {
            Event::Connect { conn, handle } => self.on_connect(conn, handle),
            Event::Command { conn, command } => self.dispatch(conn, command),
            Event::Disconnect { conn } => self.on_disconnect(conn),
            Event::Shutdown => {}
        }
    }

    fn dispatch(&mut self, conn: ConnId, command: Command) {
        match command {
            Command::Version { version } => self.on_version(conn, version),
            Command::Authenticate {
                username,
                access_token,
            } => self.on_authenticate(conn, username, access_token),
            Command::Chunk { p, q, key } => self.on_chunk(conn, p, q, key),
            Command::Block { x, y, z, w } => self.on_block(conn, x, y, z, w),
            Command::Extra { x, y, z, w } => self.on_extra(conn, x, y, z, w),
            Command::Light { x, y, z, w } => self.on_light(conn, x, y, z, w),
            Command::Shape { x, y, z, w } => self.on_shape(conn, x, y, z, w),
            Command::Transform { x, y, z, w } => self.on_transform(conn, x, y, z, w),
            Command::Sign { x, y, z, face, text } => self.on_sign(conn, x, y, z, face, text),
            Command::Position { player, pose } => self.on_position(conn, player, pose),
            Command::Add { player } => self.on_add(conn, player),
            Command::Remove { player } => self.on_remove(conn, player),
            Command::Talk { text } => self.on_talk(conn, text),
            Command::Nick { player, nick } => self.on_nick(conn, player, nick),
            Command::Spawn { player } => self.on_spawn(conn, player),
            Command::Goto { player, nick } => self.on_goto(conn, player, nick),
            Command::Pq { player, p, q } => self.on_pq(conn, player, p, q),
            Command::Event {
                player,
                x,
                y,
                z,
                face,
            } => self.on_event(conn, player, x, y, z, face),
        }
    }

    /// The block at a world coordinate: a stored edit if there is one,
    /// otherwise whatever the generator would have produced.
    fn block(&self, x: i32, y: i32, z: i32) -> i32 {
        self.store
            .block_at(x, y, z)
            .unwrap_or_else(|| self.generator.default_block(x, y, z))
    }

    /// Smallest client id not currently in use. Ids are recycled so they
    /// stay small enough to render next to nicknames.
    fn next_client_id(&self) -> u32 {
        let mut id = 1;
        while self.clients.values().any(|client| client.client_id == id) {
            id += 1;
        }
        id
    }

    fn on_connect(&mut self, conn: ConnId, handle: ConnectionHandle) {
        let client_id = self.next_client_id();
        info!("client {} connected from {}", client_id, handle.addr);
        handle.send(&Packet::Time {
            time: unix_time(),
            day_length: self.config.day_length,
        });
        handle.send(&Packet::Talk {
            text: "Welcome to VoxelWorld!".to_string(),
        });
        handle.send(&Packet::Talk {
            text: "Type \"/help\" for a list of commands.".to_string(),
        });
        let players = (1..=MAX_LOCAL_PLAYERS)
            .map(|slot| LocalPlayer {
                nick: format!("guest{}-{}", client_id, slot),
                pose: self.config.spawn_point,
                active: false,
            })
            .collect();
        self.clients.insert(
            conn,
            Client {
                client_id,
                handle: handle.clone(),
                version: None,
                user_id: None,
                nick: None,
                players,
            },
        );
        for slot in 1..=MAX_LOCAL_PLAYERS {
            handle.send(&Packet::You {
                client_id,
                player: slot,
                pose: self.config.spawn_point,
            });
            self.send_nick(conn, slot);
        }
        for slot in 1..=MAX_LOCAL_PLAYERS {
            self.send_positions(conn, slot);
        }
        self.send_nicks(conn);
        self.send_options(conn);
    }

    fn on_disconnect(&mut self, conn: ConnId) {
        let client = match self.clients.remove(&conn) {
            Some(client) => client,
            None => return,
        };
        info!(
            "client {} disconnected from {}",
            client.client_id, client.handle.addr
        );
        self.broadcast(
            conn,
            &Packet::Disconnect {
                client_id: client.client_id,
            },
        );
        self.send_talk(&format!(
            "{} has disconnected from the server.",
            client.players[0].nick
        ));
    }

    /// The first version frame wins; anything but the supported protocol
    /// version gets the connection dropped.
    fn on_version(&mut self, conn: ConnId, version: i64) {
        let client = match self.clients.get_mut(&conn) {
            Some(client) => client,
            None => return,
        };
        if client.version.is_some() {
            return;
        }
        if version != PROTOCOL_VERSION {
            warn!(
                "unsupported protocol version {} from client {}",
                version, client.client_id
            );
            client.handle.stop();
            return;
        }
        client.version = Some(version);
    }

    /// No login backend is wired up, so every authentication lands the
    /// client in a guest session named after its client id.
    fn on_authenticate(&mut self, conn: ConnId, username: String, _access_token: String) {
        let client = match self.clients.get_mut(&conn) {
            Some(client) => client,
            None => return,
        };
        debug!(
            "authentication from client {} as {:?}, assigning guest session",
            client.client_id, username
        );
        client.user_id = None;
        client.nick = Some(format!("guest{}", client.client_id));
        let joined = client.players[0].nick.clone();
        self.send_nick(conn, 1);
        self.send_talk(&format!("{} has joined the game.", joined));
    }

    fn on_block(&mut self, conn: ConnId, x: i32, y: i32, z: i32, w: i32) {
        let (p, q) = (chunked(x), chunked(z));
        let previous = self.block(x, y, z);
        let client = match self.clients.get(&conn) {
            Some(client) => client,
            None => return,
        };
        let refusal = if self.config.auth_required && client.user_id.is_none() {
            Some("Only logged in users are allowed to build.")
        } else if y <= 0 || y > 255 {
            Some("Invalid block coordinates.")
        } else if !self.config.allowed_items.contains(&w) {
            Some("That item is not allowed.")
        } else if w != 0 && previous != 0 {
            Some("Cannot create blocks in a non-empty space.")
        } else if w == 0 && previous == 0 {
            Some("That space is already empty.")
        } else if self.config.indestructible_items.contains(&previous) {
            Some("Cannot destroy that type of block.")
        } else {
            None
        };
        if let Some(refusal) = refusal {
            // Resend the authoritative state so the offender's local
            // prediction rolls back.
            client.handle.send(&Packet::Block {
                p,
                q,
                x,
                y,
                z,
                w: previous,
            });
            client.handle.send(&Packet::Redraw { p, q });
            client.handle.send(&Packet::Talk {
                text: refusal.to_string(),
            });
            return;
        }
        if self.config.record_history {
            let user_id = client.user_id;
            self.store.record_history(HistoryRow {
                timestamp: unix_time(),
                user_id,
                x,
                y,
                z,
                w,
            });
        }
        self.store.set_block(p, q, x, y, z, w);
        self.send_edit(conn, Packet::Block { p, q, x, y, z, w }, p, q);
        // A block on a chunk edge also lands in the neighboring chunks as
        // a negative ghost row, so their meshes rebuild without a resync.
        for dx in -1..=1 {
            for dz in -1..=1 {
                if dx == 0 && dz == 0 {
                    continue;
                }
                if dx != 0 && chunked(x + dx) == p {
                    continue;
                }
                if dz != 0 && chunked(z + dz) == q {
                    continue;
                }
                let (gp, gq) = (p + dx, q + dz);
                self.store.set_block(gp, gq, x, y, z, -w);
                self.send_edit(
                    conn,
                    Packet::Block {
                        p: gp,
                        q: gq,
                        x,
                        y,
                        z,
                        w: -w,
                    },
                    gp,
                    gq,
                );
            }
        }
        if w == 0 {
            self.store.clear_attachments(x, y, z);
        }
    }

    fn on_extra(&mut self, conn: ConnId, x: i32, y: i32, z: i32, w: i32) {
        let (p, q) = (chunked(x), chunked(z));
        let block = self.block(x, y, z);
        let client = match self.clients.get(&conn) {
            Some(client) => client,
            None => return,
        };
        let refusal = if self.config.auth_required && client.user_id.is_none() {
            Some("Only logged in users are allowed to build.")
        } else if y <= 0 || y > 255 {
            Some("Invalid block coordinates.")
        } else if block == 0 {
            Some("Extras must be placed on a block.")
        } else {
            None
        };
        if let Some(refusal) = refusal {
            reject_edit(&client.handle, p, q, refusal);
            return;
        }
        self.store.set_decoration(Decoration::Extra, p, q, x, y, z, w);
        self.send_edit(conn, Packet::Extra { p, q, x, y, z, w }, p, q);
    }

    fn on_light(&mut self, conn: ConnId, x: i32, y: i32, z: i32, w: i32) {
        let (p, q) = (chunked(x), chunked(z));
        let block = self.block(x, y, z);
        let client = match self.clients.get(&conn) {
            Some(client) => client,
            None => return,
        };
        let refusal = if self.config.auth_required && client.user_id.is_none() {
            Some("Only logged in users are allowed to build.")
        } else if block == 0 {
            Some("Lights must be placed on a block.")
        } else if !(0..=15).contains(&w) {
            Some("Invalid light value.")
        } else {
            None
        };
        if let Some(refusal) = refusal {
            reject_edit(&client.handle, p, q, refusal);
            return;
        }
        self.store.set_decoration(Decoration::Light, p, q, x, y, z, w);
        self.send_edit(conn, Packet::Light { p, q, x, y, z, w }, p, q);
    }

    fn on_shape(&mut self, conn: ConnId, x: i32, y: i32, z: i32, w: i32) {
        let (p, q) = (chunked(x), chunked(z));
        let block = self.block(x, y, z);
        let client = match self.clients.get(&conn) {
            Some(client) => client,
            None => return,
        };
        let refusal = if self.config.auth_required && client.user_id.is_none() {
            Some("Only logged in users are allowed to build.")
        } else if y <= 0 || y > 255 {
            Some("Invalid block coordinates.")
        } else if block == 0 {
            Some("Shape must be placed on a block.")
        } else {
            None
        };
        if let Some(refusal) = refusal {
            reject_edit(&client.handle, p, q, refusal);
            return;
        }
        self.store.set_decoration(Decoration::Shape, p, q, x, y, z, w);
        self.send_edit(conn, Packet::Shape { p, q, x, y, z, w }, p, q);
    }

    fn on_transform(&mut self, conn: ConnId, x: i32, y: i32, z: i32, w: i32) {
        let (p, q) = (chunked(x), chunked(z));
        let block = self.block(x, y, z);
        let client = match self.clients.get(&conn) {
            Some(client) => client,
            None => return,
        };
        let refusal = if self.config.auth_required && client.user_id.is_none() {
            Some("Only logged in users are allowed to build.")
        } else if y <= 0 || y > 255 {
            Some("Invalid block coordinates.")
        } else if block == 0 {
            Some("Transform must be placed on a block.")
        } else {
            None
        };
        if let Some(refusal) = refusal {
            reject_edit(&client.handle, p, q, refusal);
            return;
        }
        self.store
            .set_decoration(Decoration::Transform, p, q, x, y, z, w);
        self.send_edit(conn, Packet::Transform { p, q, x, y, z, w }, p, q);
    }

    fn on_sign(&mut self, conn: ConnId, x: i32, y: i32, z: i32, face: i32, text: String) {
        let client = match self.clients.get(&conn) {
            Some(client) => client,
            None => return,
        };
        if self.config.auth_required && client.user_id.is_none() {
            client.handle.send(&Packet::Talk {
                text: "Only logged in users are allowed to build.".to_string(),
            });
            return;
        }
        if y <= 0 || y > 255 {
            return;
        }
        if !(0..=7).contains(&face) {
            return;
        }
        let text = truncate_sign(text);
        let (p, q) = (chunked(x), chunked(z));
        if text.is_empty() {
            self.store.delete_sign(x, y, z, face);
        } else {
            self.store.set_sign(p, q, x, y, z, face, &text);
        }
        self.send_edit(
            conn,
            Packet::Sign {
                p,
                q,
                x,
                y,
                z,
                face,
                text,
            },
            p,
            q,
        );
    }

    /// Incremental chunk sync. Blocks and most attachments are filtered by
    /// the client's watermark `key`; lights and signs are small enough to
    /// resend in full. The whole reply queues as one write.
    fn on_chunk(&self, conn: ConnId, p: i32, q: i32, key: u64) {
        let client = match self.clients.get(&conn) {
            Some(client) => client,
            None => return,
        };
        let blocks = self.store.blocks_after(p, q, key);
        let extras = self.store.decorations_after(Decoration::Extra, p, q, key);
        let lights = self.store.decorations_after(Decoration::Light, p, q, 0);
        let shapes = self.store.decorations_after(Decoration::Shape, p, q, key);
        let transforms = self
            .store
            .decorations_after(Decoration::Transform, p, q, key);
        let signs = self.store.signs_in(p, q);
        let dirty = !(blocks.is_empty()
            && extras.is_empty()
            && lights.is_empty()
            && shapes.is_empty()
            && transforms.is_empty()
            && signs.is_empty());

        let mut reply = String::new();
        for &(x, y, z, cell) in &blocks {
            reply.push_str(&Packet::Block { p, q, x, y, z, w: cell.w }.encode());
        }
        if let Some(newest) = blocks.iter().map(|row| row.3.id).max() {
            reply.push_str(&Packet::Key { p, q, key: newest }.encode());
        }
        for &(x, y, z, cell) in &extras {
            reply.push_str(&Packet::Extra { p, q, x, y, z, w: cell.w }.encode());
        }
        for &(x, y, z, cell) in &lights {
            reply.push_str(&Packet::Light { p, q, x, y, z, w: cell.w }.encode());
        }
        for &(x, y, z, cell) in &shapes {
            reply.push_str(&Packet::Shape { p, q, x, y, z, w: cell.w }.encode());
        }
        for &(x, y, z, cell) in &transforms {
            reply.push_str(&Packet::Transform { p, q, x, y, z, w: cell.w }.encode());
        }
        for (x, y, z, face, text) in signs {
            reply.push_str(
                &Packet::Sign {
                    p,
                    q,
                    x,
                    y,
                    z,
                    face,
                    text,
                }
                .encode(),
            );
        }
        if dirty {
            reply.push_str(&Packet::Redraw { p, q }.encode());
        }
        reply.push_str(&Packet::ChunkDone { p, q }.encode());
        client.handle.send_raw(reply);
    }

    fn on_position(&mut self, conn: ConnId, player: usize, pose: Pose) {
        let client = match self.clients.get_mut(&conn) {
            Some(client) => client,
            None => return,
        };
        match client.player_mut(player) {
            Some(local) => local.pose = pose,
            None => return,
        }
        self.send_position(conn, player);
    }

    fn on_add(&mut self, conn: ConnId, player: usize) {
        let client = match self.clients.get_mut(&conn) {
            Some(client) => client,
            None => return,
        };
        match client.player_mut(player) {
            Some(local) => local.active = true,
            None => return,
        }
        self.send_add(conn, player);
    }

    fn on_remove(&mut self, conn: ConnId, player: usize) {
        let client = match self.clients.get_mut(&conn) {
            Some(client) => client,
            None => return,
        };
        let client_id = client.client_id;
        match client.player_mut(player) {
            Some(local) => local.active = false,
            None => return,
        }
        self.broadcast(conn, &Packet::Remove { client_id, player });
    }

    fn on_nick(&mut self, conn: ConnId, player: usize, nick: Option<String>) {
        let client = match self.clients.get_mut(&conn) {
            Some(client) => client,
            None => return,
        };
        if self.config.auth_required {
            client.handle.send(&Packet::Talk {
                text: "You cannot change your nick on this server.".to_string(),
            });
            return;
        }
        match nick {
            None => {
                let text = match client.player(player) {
                    Some(local) => format!("Your nickname is {}", local.nick),
                    None => return,
                };
                client.handle.send(&Packet::Talk { text });
            }
            Some(nick) => {
                let announcement = match client.player_mut(player) {
                    Some(local) => {
                        let announcement =
                            format!("{} is now known as {}", local.nick, nick);
                        local.nick = nick;
                        announcement
                    }
                    None => return,
                };
                self.send_talk(&announcement);
                self.send_nick(conn, player);
            }
        }
    }

    fn on_spawn(&mut self, conn: ConnId, player: usize) {
        self.teleport(conn, player, self.config.spawn_point);
    }

    fn on_goto(&mut self, conn: ConnId, player: usize, nick: Option<String>) {
        let requester = match self.clients.get(&conn) {
            Some(client) => client,
            None => return,
        };
        if requester.player(player).is_none() {
            return;
        }
        let destination = match nick.as_deref() {
            None | Some("") => self.random_remote_pose(conn),
            Some(nick) => self.pose_of_nick(nick),
        };
        if let Some(pose) = destination {
            self.teleport(conn, player, pose);
        }
    }

    fn on_pq(&mut self, conn: ConnId, player: usize, p: i32, q: i32) {
        if p.abs() > 1000 || q.abs() > 1000 {
            return;
        }
        let pose = Pose::new(
            (p * CHUNK_SIZE) as f32,
            0.0,
            (q * CHUNK_SIZE) as f32,
            0.0,
            0.0,
        );
        self.teleport(conn, player, pose);
    }

    /// Client-side control events (button presses on blocks). Nothing
    /// server-side consumes them yet.
    fn on_event(&self, conn: ConnId, player: usize, x: i32, y: i32, z: i32, face: i32) {
        debug!(
            "control event from connection {}: player {} hit ({},{},{}) face {}",
            conn, player, x, y, z, face
        );
    }

    /// Moves one local player, confirming to its own client and
    /// broadcasting the new position to everyone else.
    fn teleport(&mut self, conn: ConnId, player: usize, pose: Pose) {
        let client = match self.clients.get_mut(&conn) {
            Some(client) => client,
            None => return,
        };
        let client_id = client.client_id;
        match client.player_mut(player) {
            Some(local) => local.pose = pose,
            None => return,
        }
        client.handle.send(&Packet::You {
            client_id,
            player,
            pose,
        });
        self.send_position(conn, player);
    }

    /// Pose of a random active player on some other connection.
    fn random_remote_pose(&self, conn: ConnId) -> Option<Pose> {
        let candidates: Vec<Pose> = self
            .clients
            .iter()
            .filter(|(&other, _)| other != conn)
            .flat_map(|(_, client)| client.active_players().map(|local| local.pose))
            .collect();
        candidates.choose(&mut rand::thread_rng()).copied()
    }

    /// Pose of the named player, scanning every slot of every client in
    /// client id order. The last match wins when nicks collide.
    fn pose_of_nick(&self, nick: &str) -> Option<Pose> {
        let mut clients: Vec<&Client> = self.clients.values().collect();
        clients.sort_by_key(|client| client.client_id);
        let mut found = None;
        for client in clients {
            for local in &client.players {
                if local.nick == nick {
                    found = Some(local.pose);
                }
            }
        }
        found
    }

    pub(crate) fn reply(&self, conn: ConnId, text: &str) {
        if let Some(client) = self.clients.get(&conn) {
            client.handle.send(&Packet::Talk {
                text: text.to_string(),
            });
        }
    }

    /// Sends `packet` to every client except `conn`.
    fn broadcast(&self, conn: ConnId, packet: &Packet) {
        for (&other, client) in &self.clients {
            if other != conn {
                client.handle.send(packet);
            }
        }
    }

    /// Chat line to every client, mirrored to the server log.
    pub(crate) fn send_talk(&self, text: &str) {
        info!("{}", text);
        let packet = Packet::Talk {
            text: text.to_string(),
        };
        for client in self.clients.values() {
            client.handle.send(&packet);
        }
    }

    /// An accepted edit goes to everyone else, each paired with a redraw
    /// for the touched chunk. The editing client already applied it.
    fn send_edit(&self, conn: ConnId, packet: Packet, p: i32, q: i32) {
        for (&other, client) in &self.clients {
            if other == conn {
                continue;
            }
            client.handle.send(&packet);
            client.handle.send(&Packet::Redraw { p, q });
        }
    }

    /// Broadcasts one slot's pose to everyone else.
    fn send_position(&self, conn: ConnId, player: usize) {
        let client = match self.clients.get(&conn) {
            Some(client) => client,
            None => return,
        };
        let local = match client.player(player) {
            Some(local) => local,
            None => return,
        };
        let packet = Packet::Position {
            client_id: client.client_id,
            player,
            pose: local.pose,
        };
        self.broadcast(conn, &packet);
    }

    /// Tells `conn` where everyone else's active player in `player` is.
    fn send_positions(&self, conn: ConnId, player: usize) {
        let client = match self.clients.get(&conn) {
            Some(client) => client,
            None => return,
        };
        for (&other_conn, other) in &self.clients {
            if other_conn == conn {
                continue;
            }
            if let Some(local) = other.player(player) {
                if local.active {
                    client.handle.send(&Packet::Position {
                        client_id: other.client_id,
                        player,
                        pose: local.pose,
                    });
                }
            }
        }
    }

    /// One slot nick of `conn`, broadcast to every client including the
    /// owner.
    fn send_nick(&self, conn: ConnId, player: usize) {
        let client = match self.clients.get(&conn) {
            Some(client) => client,
            None => return,
        };
        let local = match client.player(player) {
            Some(local) => local,
            None => return,
        };
        let packet = Packet::Nick {
            client_id: client.client_id,
            player,
            nick: local.nick.clone(),
        };
        for other in self.clients.values() {
            other.handle.send(&packet);
        }
    }

    /// Tells `conn` the slot nicks of every other client.
    fn send_nicks(&self, conn: ConnId) {
        let client = match self.clients.get(&conn) {
            Some(client) => client,
            None => return,
        };
        for (&other_conn, other) in &self.clients {
            if other_conn == conn {
                continue;
            }
            for (index, local) in other.players.iter().enumerate() {
                client.handle.send(&Packet::Nick {
                    client_id: other.client_id,
                    player: index + 1,
                    nick: local.nick.clone(),
                });
            }
        }
    }

    fn send_options(&self, conn: ConnId) {
        let client = match self.clients.get(&conn) {
            Some(client) => client,
            None => return,
        };
        for (name, value) in self.store.options() {
            client.handle.send(&Packet::Option {
                name: name.to_string(),
                value: value.to_string(),
            });
        }
        if let Some(worldgen) = &self.config.worldgen {
            client.handle.send(&Packet::Option {
                name: "worldgen".to_string(),
                value: worldgen.clone(),
            });
        }
    }

    /// Announces a newly activated local player and brings both sides up
    /// to date on positions and nicks.
    fn send_add(&self, conn: ConnId, player: usize) {
        let client = match self.clients.get(&conn) {
            Some(client) => client,
            None => return,
        };
        self.broadcast(
            conn,
            &Packet::Add {
                client_id: client.client_id,
                player,
            },
        );
        self.send_position(conn, player);
        self.send_positions(conn, player);
        for slot in 1..=MAX_LOCAL_PLAYERS {
            self.send_nick(conn, slot);
        }
        self.send_nicks(conn);
    }
}

fn reject_edit(handle: &ConnectionHandle, p: i32, q: i32, refusal: &str) {
    handle.send(&Packet::Redraw { p, q });
    handle.send(&Packet::Talk {
        text: refusal.to_string(),
    });
}

/// Signs longer than the cap are cut down rather than rejected.
fn truncate_sign(text: String) -> String {
    if text.chars().count() > shared::MAX_SIGN_LENGTH {
        warn!("truncating oversized sign text");
        text.chars().take(shared::MAX_SIGN_LENGTH - 1).collect()
    } else {
        text
    }
}

fn unix_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_secs_f64())
        .unwrap_or_default()
}
