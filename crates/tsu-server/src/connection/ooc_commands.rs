//! Bodies of the OOC slash commands.

use super::*;

use tsu_command::{Invocation, Param};

const NOT_AUTHORIZED: &str = "You must be authorized to do that.";
const AREA_STATUSES: [&str; 6] = [
    "idle",
    "building-open",
    "building-full",
    "casing-open",
    "casing-full",
    "recess",
];

const NONE: &[Param] = &[];
const CLIENT_ID: &[Param] = &[Param::integer("id")];
const IP: &[Param] = &[Param::string("ip")];
const MESSAGE: &[Param] = &[Param::string("message")];
const PASSWORD: &[Param] = &[Param::string("password")];
const POSITION: &[Param] = &[Param::string("position").optional()];
const AREA_ID: &[Param] = &[Param::integer("id").optional()];
const STATUS: &[Param] = &[Param::string("status")];

pub(super) fn build_registry() -> CommandRegistry<ConnectionHandler> {
    let mut reg = CommandRegistry::new();
    reg.register("help", "List available commands", NONE, ooc_cmd_help);
    reg.register("pos", "Set or reset your stage position", POSITION, ooc_cmd_pos);
    reg.register("login", "Log in as a moderator", PASSWORD, ooc_cmd_login);
    reg.register("kick", "Disconnect a client", CLIENT_ID, ooc_cmd_kick);
    reg.register("ban", "Ban an IP address", IP, ooc_cmd_ban);
    reg.register("unban", "Lift an IP ban", IP, ooc_cmd_unban);
    reg.register("mute", "Stop a client from sending IC messages", CLIENT_ID, ooc_cmd_mute);
    reg.register("unmute", "Let a muted client talk again", CLIENT_ID, ooc_cmd_unmute);
    reg.register("g", "Send a message to every area", MESSAGE, ooc_cmd_g);
    reg.register("area", "List areas, or move to one", AREA_ID, ooc_cmd_area);
    reg.register("getarea", "List the characters in your area", NONE, ooc_cmd_getarea);
    reg.register("status", "Set the status of your area", STATUS, ooc_cmd_status);
    reg.register("motd", "Show the message of the day", NONE, ooc_cmd_motd);
    reg.register("judgelog", "Show recent judge actions in your area", NONE, ooc_cmd_judgelog);
    reg
}

fn require_mod(ctx: &ConnectionHandler, client_id: u32) -> Result<(), CommandError> {
    match ctx.session(client_id) {
        Some(session) if session.is_mod => Ok(()),
        _ => Err(CommandError::Client(NOT_AUTHORIZED.into())),
    }
}

/// Resolve the client id argument at `index` to a connected client.
fn target_client(ctx: &ConnectionHandler, inv: &Invocation, index: usize) -> Result<u32, CommandError> {
    inv.args
        .integer(index)
        .and_then(|id| u32::try_from(id).ok())
        .filter(|id| ctx.session(*id).is_some())
        .ok_or_else(|| CommandError::Argument("No client with that ID.".into()))
}

fn current_area(ctx: &ConnectionHandler, client_id: u32) -> Result<usize, CommandError> {
    ctx.session(client_id)
        .map(|s| s.area)
        .ok_or_else(|| CommandError::Server("No such client.".into()))
}

fn ooc_cmd_help(ctx: &mut ConnectionHandler, inv: &Invocation) -> Result<(), CommandError> {
    let lines = ctx.commands.help_lines();
    ctx.send_host_message(
        inv.sender,
        &format!("Available commands:\r\n{}", lines.join("\r\n")),
    );
    Ok(())
}

fn ooc_cmd_pos(ctx: &mut ConnectionHandler, inv: &Invocation) -> Result<(), CommandError> {
    match inv.args.string(0) {
        None => {
            ctx.change_position(inv.sender, None)?;
            ctx.send_host_message(inv.sender, "Position reset.");
        }
        Some(pos) => {
            ctx.change_position(inv.sender, Some(pos))?;
            ctx.send_host_message(inv.sender, "Position changed.");
        }
    }
    Ok(())
}

fn ooc_cmd_login(ctx: &mut ConnectionHandler, inv: &Invocation) -> Result<(), CommandError> {
    let password = inv.args.string(0).unwrap_or_default();
    let modpass = &ctx.config.server.modpass;
    if modpass.is_empty() || password != modpass.as_str() {
        return Err(CommandError::Client("Invalid password.".into()));
    }
    if let Some(session) = ctx.session_mut(inv.sender) {
        session.is_mod = true;
    }
    info!("Client {} logged in as moderator", inv.sender);
    ctx.send_host_message(inv.sender, "Logged in as a moderator.");
    Ok(())
}

fn ooc_cmd_kick(ctx: &mut ConnectionHandler, inv: &Invocation) -> Result<(), CommandError> {
    require_mod(ctx, inv.sender)?;
    let target = target_client(ctx, inv, 0)?;
    info!("Client {} kicked client {target}", inv.sender);
    ctx.disconnect(target);
    ctx.send_host_message(inv.sender, &format!("Kicked client {target}."));
    Ok(())
}

fn ooc_cmd_ban(ctx: &mut ConnectionHandler, inv: &Invocation) -> Result<(), CommandError> {
    require_mod(ctx, inv.sender)?;
    let ip: IpAddr = inv
        .args
        .string(0)
        .unwrap_or_default()
        .parse()
        .map_err(|_| CommandError::Argument("Invalid IP address.".into()))?;

    let targets: Vec<(u32, String)> = ctx
        .sessions
        .values()
        .filter(|s| s.ip == ip)
        .map(|s| (s.id, s.hdid.clone()))
        .collect();
    let reason = format!("banned by client {}", inv.sender);
    let newly_banned = ctx.bans.ban_ip(&ip.to_string(), &reason);
    if !newly_banned && targets.is_empty() {
        return Err(CommandError::Client(format!("{ip} is already banned.")));
    }
    for (client_id, hdid) in &targets {
        ctx.bans.ban_hdid(hdid, &reason);
        ctx.disconnect(*client_id);
    }
    info!("Client {} banned {ip}, {} clients kicked", inv.sender, targets.len());
    ctx.send_host_message(
        inv.sender,
        &format!("Banned {ip} ({} clients kicked).", targets.len()),
    );
    Ok(())
}

fn ooc_cmd_unban(ctx: &mut ConnectionHandler, inv: &Invocation) -> Result<(), CommandError> {
    require_mod(ctx, inv.sender)?;
    let ip = inv.args.string(0).unwrap_or_default().to_string();
    if !ctx.bans.unban_ip(&ip) {
        return Err(CommandError::Client(format!("{ip} is not banned.")));
    }
    info!("Client {} unbanned {ip}", inv.sender);
    ctx.send_host_message(inv.sender, &format!("Unbanned {ip}."));
    Ok(())
}

fn set_muted(ctx: &mut ConnectionHandler, inv: &Invocation, muted: bool) -> Result<u32, CommandError> {
    require_mod(ctx, inv.sender)?;
    let target = target_client(ctx, inv, 0)?;
    if let Some(session) = ctx.session_mut(target) {
        session.is_muted = muted;
    }
    Ok(target)
}

fn ooc_cmd_mute(ctx: &mut ConnectionHandler, inv: &Invocation) -> Result<(), CommandError> {
    let target = set_muted(ctx, inv, true)?;
    info!("Client {} muted client {target}", inv.sender);
    ctx.send_host_message(inv.sender, &format!("Muted client {target}."));
    Ok(())
}

fn ooc_cmd_unmute(ctx: &mut ConnectionHandler, inv: &Invocation) -> Result<(), CommandError> {
    let target = set_muted(ctx, inv, false)?;
    info!("Client {} unmuted client {target}", inv.sender);
    ctx.send_host_message(inv.sender, &format!("Unmuted client {target}."));
    Ok(())
}

fn ooc_cmd_g(ctx: &mut ConnectionHandler, inv: &Invocation) -> Result<(), CommandError> {
    let Some(session) = ctx.session(inv.sender) else {
        return Err(CommandError::Server("No such client.".into()));
    };
    if session.is_muted {
        return Err(CommandError::Client(
            "You have been muted by a moderator.".into(),
        ));
    }
    let msg = inv.args.string(0).unwrap_or_default();
    ctx.broadcast_global(inv.sender, msg, session.is_mod);
    info!("[GLOBAL][{}]{msg}", ctx.char_name(inv.sender));
    Ok(())
}

fn ooc_cmd_area(ctx: &mut ConnectionHandler, inv: &Invocation) -> Result<(), CommandError> {
    let Some(id) = inv.args.integer(0) else {
        let mut msg = String::from("Areas:");
        for area in ctx.areas.iter() {
            msg.push_str(&format!(
                "\r\n[{}] {} (users: {}) [{}]",
                area.id,
                area.name,
                area.player_count(),
                area.status
            ));
        }
        ctx.send_host_message(inv.sender, &msg);
        return Ok(());
    };
    let target = usize::try_from(id)
        .ok()
        .filter(|id| ctx.areas.get(*id).is_some())
        .ok_or_else(|| CommandError::Argument("Area ID must be valid.".into()))?;
    ctx.change_area(inv.sender, target)
}

fn ooc_cmd_getarea(ctx: &mut ConnectionHandler, inv: &Invocation) -> Result<(), CommandError> {
    let area_id = current_area(ctx, inv.sender)?;
    let Some(area) = ctx.areas.get(area_id) else {
        return Err(CommandError::Area("Area not found.".into()));
    };
    let mut msg = format!("Area {}:", area.name);
    for client_id in area.clients() {
        msg.push_str(&format!("\r\n[{client_id}] {}", ctx.char_name(client_id)));
    }
    ctx.send_host_message(inv.sender, &msg);
    Ok(())
}

fn ooc_cmd_status(ctx: &mut ConnectionHandler, inv: &Invocation) -> Result<(), CommandError> {
    let status = inv.args.string(0).unwrap_or_default().to_lowercase();
    if !AREA_STATUSES.contains(&status.as_str()) {
        return Err(CommandError::Argument(format!(
            "Invalid status. Possible values: {}.",
            AREA_STATUSES.join(", ")
        )));
    }
    let area_id = current_area(ctx, inv.sender)?;
    let status = status.to_uppercase();
    if let Some(area) = ctx.areas.get_mut(area_id) {
        area.status = status.clone();
    }
    let announcement = format!("{} changed status to {status}.", ctx.char_name(inv.sender));
    ctx.send_area(area_id, &ctx.host_message(&announcement));
    ctx.send_arup_status();
    info!("[{area_id}]Client {} changed status to {status}", inv.sender);
    Ok(())
}

fn ooc_cmd_motd(ctx: &mut ConnectionHandler, inv: &Invocation) -> Result<(), CommandError> {
    ctx.send_motd(inv.sender);
    Ok(())
}

fn ooc_cmd_judgelog(ctx: &mut ConnectionHandler, inv: &Invocation) -> Result<(), CommandError> {
    require_mod(ctx, inv.sender)?;
    let area_id = current_area(ctx, inv.sender)?;
    let Some(area) = ctx.areas.get(area_id) else {
        return Err(CommandError::Area("Area not found.".into()));
    };
    let mut msg = format!("Judge log for {}:", area.name);
    for entry in area.judgelog() {
        msg.push_str("\r\n");
        msg.push_str(entry);
    }
    ctx.send_host_message(inv.sender, &msg);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::super::test_util::*;
    use super::*;

    fn host(msg: &str) -> String {
        format!("CT#<dollar>H#{msg}#%")
    }

    #[test]
    fn help_lists_every_command() {
        let mut h = Harness::new();
        let a = h.join(1, "10.0.0.1", 0);
        h.drain();
        h.feed(a, "CT#Alice#/help#%");
        let out = h.drain();
        let lines = sends(&out, a);
        assert_eq!(lines.len(), 1);
        assert!(lines[0].starts_with("CT#<dollar>H#Available commands:"));
        for name in ["/area", "/ban", "/g", "/kick", "/login", "/pos", "/status"] {
            assert!(lines[0].contains(name), "missing {name}");
        }
    }

    #[test]
    fn pos_set_reset_and_invalid() {
        let mut h = Harness::new();
        let a = h.join(1, "10.0.0.1", 0);
        h.drain();
        h.feed(a, "CT#Alice#/pos wit#%");
        assert_eq!(sends(&h.drain(), a), vec![host("Position changed.")]);
        assert_eq!(h.handler.session(0).unwrap().pos.as_deref(), Some("wit"));

        h.feed(a, "CT#Alice#/pos#%");
        assert_eq!(sends(&h.drain(), a), vec![host("Position reset.")]);
        assert_eq!(h.handler.session(0).unwrap().pos, None);

        h.feed(a, "CT#Alice#/pos gallery#%");
        let out = h.drain();
        assert!(sends(&out, a)[0].starts_with("CT#<dollar>H#Invalid position."));
    }

    #[test]
    fn login_with_wrong_password() {
        let mut h = Harness::new();
        let a = h.join(1, "10.0.0.1", 0);
        h.drain();
        h.feed(a, "CT#Alice#/login hunter2#%");
        assert_eq!(sends(&h.drain(), a), vec![host("Invalid password.")]);
        assert!(!h.handler.session(0).unwrap().is_mod);

        h.feed(a, "CT#Alice#/login secret#%");
        assert_eq!(sends(&h.drain(), a), vec![host("Logged in as a moderator.")]);
        assert!(h.handler.session(0).unwrap().is_mod);
    }

    #[test]
    fn kick_argument_errors() {
        let mut h = Harness::new();
        let a = h.join(1, "10.0.0.1", 0);
        h.feed(a, "CT#Alice#/login secret#%");
        h.drain();

        h.feed(a, "CT#Alice#/kick#%CT#Alice#/kick bob#%CT#Alice#/kick 3#%");
        assert_eq!(
            sends(&h.drain(), a),
            vec![
                host("Missing argument: id."),
                host("id must be a number."),
                host("No client with that ID."),
            ]
        );
    }

    #[test]
    fn ban_kicks_everyone_on_the_address() {
        let mut h = Harness::new();
        let m = h.join(1, "10.0.0.1", 0);
        let b = h.join(2, "10.0.0.2", 1);
        let c = h.join(3, "10.0.0.2", 2);
        h.feed(m, "CT#Mod#/login secret#%");
        h.drain();

        h.feed(m, "CT#Mod#/ban 10.0.0.2#%");
        let out = h.drain();
        assert_eq!(disconnects(&out, b), 1);
        assert_eq!(disconnects(&out, c), 1);
        assert!(sends(&out, m).contains(&host("Banned 10.0.0.2 (2 clients kicked).").as_str()));
        assert!(h.handler.bans.is_banned("10.0.0.2", ""));
        assert!(h.handler.bans.is_banned("192.168.0.9", "hdid2"));

        // the banned address cannot get back in
        let again = h.connect(4, "10.0.0.2");
        h.feed(again, "HI#fresh#%");
        assert_eq!(disconnects(&h.drain(), again), 1);

        h.feed(m, "CT#Mod#/ban 10.0.0.2#%CT#Mod#/ban nonsense#%");
        assert_eq!(
            sends(&h.drain(), m),
            vec![
                host("10.0.0.2 is already banned."),
                host("Invalid IP address."),
            ]
        );

        h.feed(m, "CT#Mod#/unban 10.0.0.2#%");
        assert_eq!(sends(&h.drain(), m), vec![host("Unbanned 10.0.0.2.")]);
        assert!(!h.handler.bans.is_banned("10.0.0.2", ""));
    }

    #[test]
    fn mute_and_unmute() {
        let mut h = Harness::new();
        let m = h.join(1, "10.0.0.1", 0);
        let b = h.join(2, "10.0.0.2", 1);
        h.feed(m, "CT#Mod#/login secret#%CT#Mod#/mute 1#%");
        h.drain();
        assert!(h.handler.session(1).unwrap().is_muted);

        h.feed(b, &ic_line(1, "hello", 0, 0));
        h.feed(b, "CT#Bob#/g anyone?#%");
        let out = h.drain();
        assert!(sends(&out, m).is_empty());
        assert_eq!(
            sends(&out, b),
            vec![
                host("You have been muted by a moderator"),
                host("You have been muted by a moderator."),
            ]
        );

        h.feed(m, "CT#Mod#/unmute 1#%");
        h.drain();
        assert!(!h.handler.session(1).unwrap().is_muted);
    }

    #[test]
    fn global_message_reaches_every_area() {
        let mut h = Harness::new();
        let a = h.join(1, "10.0.0.1", 0);
        let b = h.join(2, "10.0.0.2", 1);
        let b_id = h.client_id(b).unwrap();
        h.handler.change_area(b_id, 1).unwrap();
        h.drain();

        h.feed(a, "CT#Alice#/g hello all#%");
        let out = h.drain();
        assert_eq!(sends(&out, b), vec!["CT#$G[0][Phoenix]#hello all#%"]);
        assert_eq!(sends(&out, a), vec!["CT#$G[0][Phoenix]#hello all#%"]);
    }

    #[test]
    fn area_list_and_move() {
        let mut h = Harness::new();
        let a = h.join(1, "10.0.0.1", 0);
        h.drain();

        h.feed(a, "CT#Alice#/area#%");
        assert_eq!(
            sends(&h.drain(), a),
            vec![host(
                "Areas:\r\n[0] Lobby (users: 1) [IDLE]\r\n[1] Courtroom (users: 0) [IDLE]"
            )]
        );

        h.feed(a, "CT#Alice#/area 5#%");
        assert_eq!(sends(&h.drain(), a), vec![host("Area ID must be valid.")]);

        h.feed(a, "CT#Alice#/area 1#%");
        h.drain();
        assert_eq!(h.handler.session(0).unwrap().area, 1);
    }

    #[test]
    fn getarea_lists_characters() {
        let mut h = Harness::new();
        let a = h.join(1, "10.0.0.1", 0);
        h.connect(2, "10.0.0.2");
        h.drain();
        h.feed(a, "CT#Alice#/getarea#%");
        assert_eq!(
            sends(&h.drain(), a),
            vec![host("Area Lobby:\r\n[0] Phoenix\r\n[1] CHAR_SELECT")]
        );
    }

    #[test]
    fn status_updates_area_and_resyncs() {
        let mut h = Harness::new();
        let a = h.join(1, "10.0.0.1", 0);
        h.drain();
        h.feed(a, "CT#Alice#/status casing-open#%");
        assert_eq!(
            sends(&h.drain(), a),
            vec![
                host("Phoenix changed status to CASING-OPEN."),
                "ARUP#1#CASING-OPEN#IDLE#%".to_string(),
            ]
        );

        h.feed(a, "CT#Alice#/status partying#%");
        assert!(sends(&h.drain(), a)[0].starts_with("CT#<dollar>H#Invalid status."));
    }

    #[test]
    fn judgelog_is_moderator_only() {
        let mut h = Harness::new();
        let a = h.join(1, "10.0.0.1", 0);
        h.drain();
        h.feed(a, "HP#1#5#%CT#Alice#/judgelog#%");
        assert_eq!(
            sends(&h.drain(), a),
            vec!["HP#1#5#%".to_string(), host(NOT_AUTHORIZED)]
        );

        h.feed(a, "CT#Alice#/login secret#%CT#Alice#/judgelog#%");
        let out = h.drain();
        assert_eq!(
            sends(&out, a)[1],
            host("Judge log for Lobby:\r\nPhoenix (10.0.0.1) changed the penalties.")
        );
    }

    #[test]
    fn motd_resent() {
        let mut h = Harness::new();
        let a = h.join(1, "10.0.0.1", 0);
        h.drain();
        h.feed(a, "CT#Alice#/motd#%");
        assert_eq!(
            sends(&h.drain(), a),
            vec![host("=== MOTD ===\r\nWelcome\r\n=============")]
        );
    }
}
