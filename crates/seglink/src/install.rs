//! Installation controller.
//!
//! Decides, for every local SID, whether it should currently be
//! programmed into the forwarding plane, and drives the broker
//! through the [`SidBackend`] seam. The machine is edge-triggered:
//!
//! ```text
//! declared --(attrs complete, collaborators live)--> valid
//! valid    --(send ok)-------------------------->   installed
//! installed --(attrs invalid)-->  valid (unsent), DEL dispatched
//! any      --(delete)--------->  freed
//! ```
//!
//! Re-evaluation happens on every broker resource event; SIDs whose
//! derived state did not change are no-ops.

use std::collections::BTreeMap;
use std::net::{Ipv4Addr, Ipv6Addr};

use tracing::{debug, warn};

use crate::behavior::{Behavior, CSID_DEFAULT_BLOCK_LEN, CSID_DEFAULT_NODE_FN_LEN};
use crate::error::{Error, Result};
use crate::local_sid::LocalSid;
use crate::sid::SidStructure;
use crate::static_sid::StaticSidTable;

/// Broker-known state of one interface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InterfaceState {
    /// Kernel interface index.
    pub ifindex: u32,
    /// Whether the interface is currently up.
    pub up: bool,
    /// Loopback interfaces are never picked as a default oif.
    pub loopback: bool,
}

/// Broker-known state of one VRF.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VrfState {
    /// Routing table backing the VRF.
    pub table_id: u32,
    /// Interface index of the VRF device.
    pub ifindex: u32,
    /// Whether the VRF is ACTIVE.
    pub active: bool,
}

/// Resource events sourced from broker notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceEvent {
    /// A VRF became active.
    VrfUp {
        /// VRF name.
        name: String,
        /// Routing table id.
        table_id: u32,
        /// VRF device interface index.
        ifindex: u32,
    },
    /// A VRF went away.
    VrfDown {
        /// VRF name.
        name: String,
    },
    /// An interface came up.
    InterfaceUp {
        /// Interface name.
        name: String,
        /// Kernel interface index.
        ifindex: u32,
        /// Whether this is a loopback interface.
        loopback: bool,
    },
    /// An interface went down.
    InterfaceDown {
        /// Interface name.
        name: String,
    },
    /// A registered nexthop was resolved or lost.
    NexthopUpdate {
        /// The nexthop address.
        addr: Ipv6Addr,
        /// Whether the nexthop is now reachable.
        resolved: bool,
    },
}

/// Outcome codes of a ROUTE_NOTIFY message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RouteNotify {
    /// Installation into the forwarding plane failed.
    FailInstall = 0,
    /// A better admin-distance route won.
    BetterAdminWon = 1,
    /// The route is installed.
    Installed = 2,
    /// The route was removed.
    Removed = 3,
    /// Removal failed.
    RemoveFail = 4,
}

impl RouteNotify {
    /// Parse the wire code.
    pub fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            0 => Self::FailInstall,
            1 => Self::BetterAdminWon,
            2 => Self::Installed,
            3 => Self::Removed,
            4 => Self::RemoveFail,
            _ => return None,
        })
    }
}

/// The broker's view of the world, as accumulated from notifications.
#[derive(Debug, Default)]
pub struct ResourceView {
    interfaces: BTreeMap<String, InterfaceState>,
    vrfs: BTreeMap<String, VrfState>,
}

impl ResourceView {
    /// Create an empty view.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fold one resource event into the view.
    pub fn apply(&mut self, event: &ResourceEvent) {
        match event {
            ResourceEvent::VrfUp {
                name,
                table_id,
                ifindex,
            } => {
                self.vrfs.insert(
                    name.clone(),
                    VrfState {
                        table_id: *table_id,
                        ifindex: *ifindex,
                        active: true,
                    },
                );
            }
            ResourceEvent::VrfDown { name } => {
                if let Some(vrf) = self.vrfs.get_mut(name) {
                    vrf.active = false;
                }
            }
            ResourceEvent::InterfaceUp {
                name,
                ifindex,
                loopback,
            } => {
                self.interfaces.insert(
                    name.clone(),
                    InterfaceState {
                        ifindex: *ifindex,
                        up: true,
                        loopback: *loopback,
                    },
                );
            }
            ResourceEvent::InterfaceDown { name } => {
                if let Some(iface) = self.interfaces.get_mut(name) {
                    iface.up = false;
                }
            }
            ResourceEvent::NexthopUpdate { .. } => {}
        }
    }

    /// Live interface by name.
    pub fn interface(&self, name: &str) -> Option<&InterfaceState> {
        self.interfaces.get(name).filter(|i| i.up)
    }

    /// Active VRF by name.
    pub fn vrf(&self, name: &str) -> Option<&VrfState> {
        self.vrfs.get(name).filter(|v| v.active)
    }

    /// First live non-loopback interface, in name order. Used as the
    /// default outgoing reference when a SID names neither an
    /// interface nor a VRF.
    pub fn default_oif(&self) -> Option<u32> {
        self.interfaces
            .values()
            .find(|i| i.up && !i.loopback)
            .map(|i| i.ifindex)
    }
}

/// Compressed-SID flavor descriptor attached to End / End.X sends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CsidFlavor {
    /// Flavor operation bits; only NEXT-C-SID is produced here.
    pub ops: u32,
    /// Locator block length in bits.
    pub lcblock_len: u8,
    /// Locator node + function length in bits.
    pub lcnode_fn_len: u8,
}

/// NEXT-C-SID flavor operation bit.
pub const FLAVOR_OP_NEXT_CSID: u32 = 1 << 3;

impl CsidFlavor {
    /// The NEXT-C-SID flavor with the default uSID lengths.
    pub fn next_csid() -> Self {
        Self {
            ops: FLAVOR_OP_NEXT_CSID,
            lcblock_len: CSID_DEFAULT_BLOCK_LEN,
            lcnode_fn_len: CSID_DEFAULT_NODE_FN_LEN,
        }
    }
}

/// A fully resolved ADD_LOCALSID order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SidInstall {
    /// SID address.
    pub addr: Ipv6Addr,
    /// Resolved outgoing interface reference.
    pub oif: u32,
    /// Action code at the broker boundary (uN/uA already resolved).
    pub action: u32,
    /// IPv4 nexthop, when the behavior forwards IPv4.
    pub nh4: Option<Ipv4Addr>,
    /// IPv6 nexthop, for End.X / uA.
    pub nh6: Option<Ipv6Addr>,
    /// Routing table, for table-lookup behaviors.
    pub table: Option<u32>,
    /// Compressed-SID flavor descriptor.
    pub flavor: Option<CsidFlavor>,
    /// Bit-field structure, when known.
    pub structure: Option<SidStructure>,
}

/// A DEL_LOCALSID order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SidUninstall {
    /// SID address.
    pub addr: Ipv6Addr,
    /// The outgoing interface the ADD was sent with.
    pub oif: u32,
}

/// Seam between the controller and the broker. The broker client
/// implements this; tests substitute a recorder.
pub trait SidBackend {
    /// Dispatch ADD_LOCALSID.
    fn add_local_sid(&mut self, req: &SidInstall) -> Result<()>;
    /// Dispatch DEL_LOCALSID.
    fn del_local_sid(&mut self, req: &SidUninstall) -> Result<()>;
}

/// What `sync_sid` did for one SID.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Derived state matched programmed state.
    Unchanged,
    /// ADD dispatched and acknowledged by the socket.
    Installed,
    /// DEL dispatched and acknowledged by the socket.
    Withdrawn,
    /// The SID is valid but could not be sent yet (no usable oif, or
    /// the send failed); retried on the next relevant event.
    Deferred,
}

/// The installation state machine over all local SIDs.
#[derive(Debug, Default)]
pub struct InstallController {
    view: ResourceView,
    // Exactly what each SENT SID was installed as. DEL must repeat
    // the oif, and a drift between this and the freshly derived
    // install means the attribute set changed under an installed SID.
    sent: BTreeMap<Ipv6Addr, SidInstall>,
}

impl InstallController {
    /// Create a controller with an empty resource view.
    pub fn new() -> Self {
        Self::default()
    }

    /// The accumulated resource view.
    pub fn view(&self) -> &ResourceView {
        &self.view
    }

    /// Derive validity: every attribute required by the behavior is
    /// present and each referenced collaborator is live.
    pub fn is_valid(&self, sid: &LocalSid) -> bool {
        if !sid.attrs_complete() {
            return false;
        }
        if let Some(vrf) = &sid.vrf
            && self.view.vrf(vrf).is_none()
        {
            return false;
        }
        if let Some(ifname) = &sid.ifname
            && self.view.interface(ifname).is_none()
        {
            return false;
        }
        true
    }

    /// Resolve the outgoing interface reference for a SID: explicit
    /// interface first, then the VRF device, then the first live
    /// non-loopback interface.
    fn resolve_oif(&self, sid: &LocalSid) -> Option<u32> {
        if let Some(ifname) = &sid.ifname {
            return self.view.interface(ifname).map(|i| i.ifindex);
        }
        if let Some(vrf) = &sid.vrf {
            return self.view.vrf(vrf).map(|v| v.ifindex);
        }
        self.view.default_oif()
    }

    /// Build the ADD order for a currently-valid SID.
    fn resolve_install(&self, sid: &LocalSid) -> Option<SidInstall> {
        let oif = self.resolve_oif(sid)?;
        let behavior = sid.behavior;
        let table = if behavior.requires_vrf() {
            let vrf = sid.vrf.as_deref()?;
            Some(self.view.vrf(vrf)?.table_id)
        } else {
            None
        };
        let flavor = matches!(behavior, Behavior::UN | Behavior::UA)
            .then(CsidFlavor::next_csid);

        Some(SidInstall {
            addr: sid.addr,
            oif,
            action: behavior.wire_code(),
            nh4: (behavior == Behavior::EndDx4)
                .then_some(sid.nexthop4)
                .flatten(),
            nh6: behavior.requires_nexthop().then_some(sid.nexthop).flatten(),
            table,
            flavor,
            structure: sid.structure,
        })
    }

    /// Re-derive one SID's desired state and dispatch the edge, if
    /// any. Retryable failures (missing resources, broker send
    /// errors) are absorbed; the SID is picked up again by the next
    /// relevant event.
    pub fn sync_sid(
        &mut self,
        sid: &mut LocalSid,
        backend: &mut dyn SidBackend,
    ) -> Result<SyncOutcome> {
        let valid = self.is_valid(sid);
        sid.flags.set_valid(valid);

        match (valid, sid.flags.is_sent()) {
            (true, false) => {
                let Some(install) = self.resolve_install(sid) else {
                    debug!(sid = %sid.addr, "no usable outgoing interface, deferring install");
                    return Ok(SyncOutcome::Deferred);
                };
                match backend.add_local_sid(&install) {
                    Ok(()) => {
                        sid.flags.set_sent(true);
                        debug!(sid = %sid.addr, behavior = %sid.behavior, oif = install.oif,
                               "local SID installed");
                        self.sent.insert(sid.addr, install);
                        Ok(SyncOutcome::Installed)
                    }
                    Err(e) if e.is_retryable() => {
                        warn!(sid = %sid.addr, error = %e, "ADD_LOCALSID failed, will retry");
                        Ok(SyncOutcome::Deferred)
                    }
                    Err(e) => Err(e),
                }
            }
            (false, true) => self.send_del(sid, backend),
            (true, true) => {
                // Attribute or resource drift under an installed SID:
                // DEL now, ADD on the next edge after the broker acks.
                let drifted = match self.sent.get(&sid.addr) {
                    Some(sent) => self.resolve_install(sid).as_ref() != Some(sent),
                    None => {
                        return Err(Error::Internal(format!(
                            "SID {} marked sent but not in catalogue",
                            sid.addr
                        )));
                    }
                };
                if drifted {
                    self.send_del(sid, backend)
                } else {
                    Ok(SyncOutcome::Unchanged)
                }
            }
            (false, false) => Ok(SyncOutcome::Unchanged),
        }
    }

    fn send_del(
        &mut self,
        sid: &mut LocalSid,
        backend: &mut dyn SidBackend,
    ) -> Result<SyncOutcome> {
        let oif = self.sent.get(&sid.addr).map(|s| s.oif).ok_or_else(|| {
            Error::Internal(format!("SID {} marked sent but not in catalogue", sid.addr))
        })?;
        let req = SidUninstall {
            addr: sid.addr,
            oif,
        };
        match backend.del_local_sid(&req) {
            Ok(()) => {
                sid.flags.set_sent(false);
                self.sent.remove(&sid.addr);
                debug!(sid = %sid.addr, "local SID withdrawn");
                Ok(SyncOutcome::Withdrawn)
            }
            Err(e) if e.is_retryable() => {
                warn!(sid = %sid.addr, error = %e, "DEL_LOCALSID failed, will retry");
                Ok(SyncOutcome::Deferred)
            }
            Err(e) => Err(e),
        }
    }

    /// Withdraw a SID that is being deleted from configuration.
    pub fn withdraw(&mut self, sid: &mut LocalSid, backend: &mut dyn SidBackend) -> Result<()> {
        if !sid.flags.is_sent() {
            return Ok(());
        }
        match self.send_del(sid, backend)? {
            SyncOutcome::Deferred => {
                // The descriptor is going away, so there is no later
                // retry; the broker flushes the stale entry when the
                // connection cycles.
                sid.flags.set_sent(false);
                self.sent.remove(&sid.addr);
                Ok(())
            }
            _ => Ok(()),
        }
    }

    /// Re-derive every static SID, in declaration order so a burst of
    /// configuration installs in the order declared. Unaffected SIDs
    /// are no-ops under the edge-triggered rule.
    pub fn sync_table(
        &mut self,
        table: &mut StaticSidTable,
        backend: &mut dyn SidBackend,
    ) -> Result<()> {
        for addr in table.declared_order() {
            if let Some(sid) = table.lookup_mut(addr) {
                self.sync_sid(sid, backend)?;
            }
        }
        Ok(())
    }

    /// Fold a broker resource event into the view without touching
    /// any SID. Callers owning non-table SID sets (adjacency SIDs)
    /// re-sync them afterwards.
    pub fn apply_event(&mut self, event: &ResourceEvent) {
        self.view.apply(event);
    }

    /// Fold a broker resource event into the view, then re-derive the
    /// table.
    pub fn handle_event(
        &mut self,
        event: &ResourceEvent,
        table: &mut StaticSidTable,
        backend: &mut dyn SidBackend,
    ) -> Result<()> {
        self.view.apply(event);
        self.sync_table(table, backend)
    }

    /// React to a ROUTE_NOTIFY for a SID this daemon sent. A failed
    /// or removed install drops the SID back to valid-but-not-sent;
    /// nothing is re-sent until the next relevant event.
    pub fn handle_route_notify(&mut self, sid: &mut LocalSid, outcome: RouteNotify) {
        match outcome {
            RouteNotify::FailInstall | RouteNotify::BetterAdminWon => {
                if sid.flags.is_sent() {
                    warn!(sid = %sid.addr, ?outcome, "broker rejected installed SID");
                    sid.flags.set_sent(false);
                    self.sent.remove(&sid.addr);
                }
            }
            RouteNotify::Installed | RouteNotify::Removed | RouteNotify::RemoveFail => {}
        }
    }

    /// The broker connection dropped: every SENT flag is stale.
    /// Clears them all so the next sync after reconnect re-sends.
    pub fn mark_disconnected<'a>(&mut self, sids: impl Iterator<Item = &'a mut LocalSid>) {
        for sid in sids {
            sid.flags.set_sent(false);
        }
        self.sent.clear();
    }
}
