//! End-to-end behavior of the installation controller, from
//! declaration through broker messages.

use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv6Addr};

use seglink::adjacency::{Adjacency, AdjSidManager, AdjacencyId, CircuitType};
use seglink::behavior::Behavior;
use seglink::error::Result;
use seglink::fpm::{FpmEncap, FpmNextHop, FpmRoute, LocalSidEncap};
use seglink::install::{
    FLAVOR_OP_NEXT_CSID, InstallController, ResourceEvent, RouteNotify, SidBackend, SidInstall,
    SidUninstall,
};
use seglink::locator::{LocatorDef, LocatorRegistry, SidOwner};
use seglink::sid::SidStructure;
use seglink::static_sid::{SidAttribute, StaticSidTable};

#[derive(Debug, Default)]
struct Recorder {
    adds: Vec<SidInstall>,
    dels: Vec<SidUninstall>,
}

impl SidBackend for Recorder {
    fn add_local_sid(&mut self, req: &SidInstall) -> Result<()> {
        self.adds.push(req.clone());
        Ok(())
    }

    fn del_local_sid(&mut self, req: &SidUninstall) -> Result<()> {
        self.dels.push(*req);
        Ok(())
    }
}

fn v6(s: &str) -> Ipv6Addr {
    s.parse().unwrap()
}

fn eth0_up() -> ResourceEvent {
    ResourceEvent::InterfaceUp {
        name: "eth0".into(),
        ifindex: 2,
        loopback: false,
    }
}

/// Scenario 1: an End SID waits for the first usable interface.
#[test]
fn end_sid_installs_after_first_interface() {
    let mut table = StaticSidTable::new();
    let mut ctl = InstallController::new();
    let mut broker = Recorder::default();

    table.add(v6("fc00::1"), Behavior::End).unwrap();
    ctl.sync_table(&mut table, &mut broker).unwrap();
    assert!(broker.adds.is_empty());

    ctl.handle_event(&eth0_up(), &mut table, &mut broker).unwrap();
    assert_eq!(broker.adds.len(), 1);
    assert_eq!(broker.adds[0].action, 1);
    assert_eq!(broker.adds[0].oif, 2);

    // Further unrelated events do not re-send.
    ctl.handle_event(
        &ResourceEvent::InterfaceUp {
            name: "eth1".into(),
            ifindex: 3,
            loopback: false,
        },
        &mut table,
        &mut broker,
    )
    .unwrap();
    assert_eq!(broker.adds.len(), 1);
}

/// Scenario 2: End.DT4 with an absent VRF installs on VRF_UP with the
/// VRF's table in the context.
#[test]
fn dt4_sid_installs_on_vrf_up() {
    let mut table = StaticSidTable::new();
    let mut ctl = InstallController::new();
    let mut broker = Recorder::default();

    table.add(v6("fc00::2"), Behavior::EndDt4).unwrap();
    table
        .set_attribute(v6("fc00::2"), SidAttribute::Vrf("red".into()))
        .unwrap();
    ctl.handle_event(&eth0_up(), &mut table, &mut broker).unwrap();
    assert!(broker.adds.is_empty());

    ctl.handle_event(
        &ResourceEvent::VrfUp {
            name: "red".into(),
            table_id: 100,
            ifindex: 7,
        },
        &mut table,
        &mut broker,
    )
    .unwrap();
    assert_eq!(broker.adds.len(), 1);
    assert_eq!(broker.adds[0].action, 8);
    assert_eq!(broker.adds[0].table, Some(100));
}

/// Scenario 3: uN resolves to End with the NEXT-C-SID flavor and the
/// default uSID lengths.
#[test]
fn un_sid_resolves_to_end_with_flavor() {
    let mut table = StaticSidTable::new();
    let mut ctl = InstallController::new();
    let mut broker = Recorder::default();

    table.add(v6("fc00::3"), Behavior::UN).unwrap();
    ctl.handle_event(&eth0_up(), &mut table, &mut broker).unwrap();

    assert_eq!(broker.adds.len(), 1);
    let add = &broker.adds[0];
    assert_eq!(add.action, 1);
    let flavor = add.flavor.expect("uN must carry a flavor descriptor");
    assert_eq!(flavor.ops, FLAVOR_OP_NEXT_CSID);
    assert_eq!(flavor.lcblock_len, 32);
    assert_eq!(flavor.lcnode_fn_len, 16);
}

/// Scenario 4: the first adjacency End.X SID lands at index 1 of the
/// locator function space.
#[test]
fn first_adjacency_sid_at_index_one() {
    let mut registry = LocatorRegistry::new();
    registry
        .create(&LocatorDef {
            name: "L1".into(),
            prefix: v6("2001:db8::"),
            prefix_len: 48,
            structure: SidStructure::new(32, 16, 16, 0).unwrap(),
            usid: false,
        })
        .unwrap();
    registry.chunk_alloc("L1", SidOwner::Isis).unwrap();

    let mut mgr = AdjSidManager::new();
    mgr.adj_up(Adjacency {
        id: AdjacencyId(1),
        ifname: "eth0".into(),
        ifindex: 2,
        circuit: CircuitType::PointToPoint,
        neighbor: None,
    });
    let sid = mgr
        .adj_ipv6_enabled(AdjacencyId(1), v6("fe80::1"), &registry, &BTreeSet::new())
        .unwrap()
        .expect("allocation on first IPv6 event");
    assert_eq!(sid.sid.addr, v6("2001:db8:0:1::"));

    // The new SID installs through the same controller machinery.
    let mut ctl = InstallController::new();
    let mut broker = Recorder::default();
    let mut adj_sids: Vec<_> = mgr.iter_mut().collect();
    ctl.sync_sid(&mut adj_sids[0].sid, &mut broker).unwrap();
    // No interface known yet: nothing sent.
    assert!(broker.adds.is_empty());
}

/// Scenario 5: local-SID encap frame for End.DT6 / vrf blue.
#[test]
fn fpm_local_sid_frame_contents() {
    let mut route = FpmRoute::new(IpAddr::V6(v6("2001::")), 64, 11);
    route.nexthops.push(FpmNextHop::dev(3));
    route.encap = Some(FpmEncap::LocalSid(LocalSidEncap {
        action: 7,
        structure: SidStructure::new(40, 24, 16, 0).unwrap(),
        nh6: None,
        nh4: None,
        vrf_name: Some("blue".into()),
    }));

    let mut buf = [0u8; 512];
    let n = route.encode_newroute(&mut buf).unwrap();
    let frame = &buf[..n];

    // ENCAP_TYPE=102 somewhere in the attribute stream, and the
    // vrfname payload with its terminator.
    let disc = 102u16.to_ne_bytes();
    assert!(frame.windows(2).any(|w| w == disc));
    assert!(frame.windows(5).any(|w| w == b"blue\0"));
    // Deterministic output.
    let mut again = [0u8; 512];
    let m = route.encode_newroute(&mut again).unwrap();
    assert_eq!(frame, &again[..m]);
}

/// Scenario 6: a FAIL_INSTALL notification drops the SID to
/// not-installed without a spontaneous re-send.
#[test]
fn fail_install_drops_state_without_resend() {
    let mut table = StaticSidTable::new();
    let mut ctl = InstallController::new();
    let mut broker = Recorder::default();

    table.add(v6("fc00::1"), Behavior::End).unwrap();
    ctl.handle_event(&eth0_up(), &mut table, &mut broker).unwrap();
    assert_eq!(broker.adds.len(), 1);

    let sid = table.lookup_mut(v6("fc00::1")).unwrap();
    ctl.handle_route_notify(sid, RouteNotify::FailInstall);
    assert!(!sid.flags.is_sent());
    assert_eq!(broker.adds.len(), 1);

    // The next resource event retries the edge.
    ctl.handle_event(
        &ResourceEvent::InterfaceUp {
            name: "eth1".into(),
            ifindex: 3,
            loopback: false,
        },
        &mut table,
        &mut broker,
    )
    .unwrap();
    assert_eq!(broker.adds.len(), 2);
}

/// ADD and DEL counts balance over any add / set-attribute / clear
/// sequence, and every DEL follows its ADD.
#[test]
fn add_del_pairing_over_lifecycle() {
    let mut table = StaticSidTable::new();
    let mut ctl = InstallController::new();
    let mut broker = Recorder::default();
    let addr = v6("fc00::2");

    table.add(addr, Behavior::EndDt6).unwrap();
    table
        .set_attribute(addr, SidAttribute::Vrf("red".into()))
        .unwrap();
    ctl.handle_event(&eth0_up(), &mut table, &mut broker).unwrap();

    // Flap the VRF a few times.
    for _ in 0..3 {
        ctl.handle_event(
            &ResourceEvent::VrfUp {
                name: "red".into(),
                table_id: 100,
                ifindex: 7,
            },
            &mut table,
            &mut broker,
        )
        .unwrap();
        ctl.handle_event(
            &ResourceEvent::VrfDown { name: "red".into() },
            &mut table,
            &mut broker,
        )
        .unwrap();
    }

    // Bring it back, then clear the SID from configuration.
    ctl.handle_event(
        &ResourceEvent::VrfUp {
            name: "red".into(),
            table_id: 100,
            ifindex: 7,
        },
        &mut table,
        &mut broker,
    )
    .unwrap();
    let mut removed = table.delete(addr).unwrap();
    ctl.withdraw(&mut removed, &mut broker).unwrap();

    assert_eq!(broker.adds.len(), broker.dels.len());
    assert_eq!(broker.adds.len(), 4);
    // Strict alternation per address: the interleaved sequence is
    // ADD, DEL, ADD, DEL, ...
    for (add, del) in broker.adds.iter().zip(broker.dels.iter()) {
        assert_eq!(add.addr, del.addr);
    }
}

/// A burst of declarations installs in the order declared, not in
/// address order.
#[test]
fn burst_installs_in_declaration_order() {
    let mut table = StaticSidTable::new();
    let mut ctl = InstallController::new();
    let mut broker = Recorder::default();

    table.add(v6("fc00::3"), Behavior::End).unwrap();
    table.add(v6("fc00::1"), Behavior::End).unwrap();
    table.add(v6("fc00::2"), Behavior::End).unwrap();
    ctl.handle_event(&eth0_up(), &mut table, &mut broker).unwrap();

    let sent: Vec<_> = broker.adds.iter().map(|a| a.addr).collect();
    assert_eq!(sent, vec![v6("fc00::3"), v6("fc00::1"), v6("fc00::2")]);
}

/// Locator deletion tears down the End.X SIDs sourced from its chunk
/// before the chunk is released.
#[test]
fn locator_delete_cascades_to_adj_sids() {
    let mut registry = LocatorRegistry::new();
    registry
        .create(&LocatorDef {
            name: "L1".into(),
            prefix: v6("2001:db8::"),
            prefix_len: 48,
            structure: SidStructure::new(32, 16, 16, 0).unwrap(),
            usid: false,
        })
        .unwrap();
    registry.chunk_alloc("L1", SidOwner::Isis).unwrap();

    let mut mgr = AdjSidManager::new();
    let mut ctl = InstallController::new();
    let mut broker = Recorder::default();
    ctl.handle_event(&eth0_up(), &mut StaticSidTable::new(), &mut broker)
        .unwrap();

    mgr.adj_up(Adjacency {
        id: AdjacencyId(1),
        ifname: "eth0".into(),
        ifindex: 2,
        circuit: CircuitType::PointToPoint,
        neighbor: None,
    });
    mgr.adj_ipv6_enabled(AdjacencyId(1), v6("fe80::1"), &registry, &BTreeSet::new())
        .unwrap();
    for adj_sid in mgr.iter_mut() {
        ctl.sync_sid(&mut adj_sid.sid, &mut broker).unwrap();
    }
    assert_eq!(broker.adds.len(), 1);

    // Delete the locator: every dependent SID is withdrawn first.
    let released = registry.delete("L1").unwrap();
    for chunk in &released {
        for mut adj_sid in mgr.release_chunk(&chunk.id()) {
            ctl.withdraw(&mut adj_sid.sid, &mut broker).unwrap();
        }
    }
    assert_eq!(broker.dels.len(), 1);
    assert!(mgr.is_empty());
}
