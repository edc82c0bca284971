//! Sync- und Rundruf-Nachrichten
//!
//! Baut die ChannelState/UserState-Nachrichten mit denen neue Clients
//! beim Handshake den Kanalbaum und die Benutzerliste erhalten und mit
//! denen Aenderungen an alle verteilt werden.

use kurzwelle_channels::{Kanal, KanalBaum};
use kurzwelle_core::types::ChannelId;
use kurzwelle_protocol::control::{ChannelState, ControlMessage, UserState};

use crate::session::SessionHandle;

/// Baut die ChannelState-Nachricht eines Kanals
pub fn kanal_state(kanal: &Kanal) -> ControlMessage {
    ControlMessage::ChannelState(ChannelState {
        kanal_id: Some(kanal.id),
        parent: kanal.parent,
        name: Some(kanal.name.clone()),
        beschreibung: if kanal.beschreibung.is_empty() {
            None
        } else {
            Some(kanal.beschreibung.clone())
        },
        links: kanal.perm_links.iter().copied().collect(),
        links_hinzu: kanal.dyn_links.iter().copied().collect(),
        links_weg: Vec::new(),
        position: Some(kanal.position),
        temporaer: Some(kanal.temporaer),
    })
}

/// Baut die Sync-Sequenz des gesamten Kanalbaums (Preorder ab Root)
///
/// Eltern kommen vor ihren Kindern, damit der Client den Baum ohne
/// Vorwaertsreferenzen aufbauen kann.
pub fn baum_sync(baum: &KanalBaum) -> Vec<ControlMessage> {
    baum.unterbaum(ChannelId::ROOT)
        .into_iter()
        .filter_map(|id| baum.kanal(id))
        .map(kanal_state)
        .collect()
}

/// Baut die UserState-Nachricht einer Session
pub fn benutzer_state(handle: &SessionHandle) -> ControlMessage {
    let daten = handle.daten();
    ControlMessage::UserState(UserState {
        session: Some(handle.id),
        akteur: None,
        user_id: daten.user_id.ist_registriert().then_some(daten.user_id),
        name: Some(daten.name.clone()),
        kanal_id: Some(daten.kanal),
        self_mute: Some(daten.selbst_mute),
        self_deaf: Some(daten.selbst_deaf),
        mute: Some(daten.mute),
        deaf: Some(daten.deaf),
        suppress: Some(daten.suppress),
        prioritaets_sprecher: Some(daten.prioritaets_sprecher),
        aufnahme: Some(daten.aufnahme),
        eigenschaften: Vec::new(),
    })
}

/// Baut die Roster-Sync-Sequenz aller authentifizierten Sessions
pub fn roster_sync(sessions: &[std::sync::Arc<SessionHandle>]) -> Vec<ControlMessage> {
    let mut nachrichten: Vec<ControlMessage> = sessions
        .iter()
        .filter(|s| s.ist_authentifiziert())
        .map(|s| benutzer_state(s))
        .collect();
    // Stabile Reihenfolge nach Session-ID
    nachrichten.sort_by_key(|n| match n {
        ControlMessage::UserState(s) => s.session.map(|id| id.0).unwrap_or(0),
        _ => 0,
    });
    nachrichten
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
