//! # Control-thread service
//!
//! Owns every mutable piece of the subsystem — pool, resolver, route-table
//! writer, counters — and drives them from a single event loop: drain the
//! control ring, run the timer sweep, answer API requests. [`NdpRuntime`]
//! wraps the service in a named worker thread with a bounded command
//! channel, in the shape of the other trellis runtimes.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crossbeam_channel::{bounded, Receiver, Sender};
use tracing::{debug, trace, warn};
use trellis_common::error::status_of;
use trellis_common::protocol::{ApiRequest, ApiResponse};
use trellis_common::types::{IfaceId, NhFlags};
use trellis_common::Error;

use crate::api;
use crate::clock::{Tick, TickClock};
use crate::config::NdpConfig;
use crate::datapath::{Datapath, DatapathHandlers};
use crate::fsm::{NhAction, Resolver, ResolverConfig};
use crate::iface::{IfaceTable, Ifaces};
use crate::pkt::{DropReason, Pkt};
use crate::pool::{Nh6Pool, NhKey};
use crate::probe;
use crate::ring::{stack_ring, HandlerId, HandlerRegistry, PostError, StackConsumer, StackMsg, StackPort};
use crate::route::RouteTable;
use crate::stats::NdpStats;
use crate::unreachable;
use crate::wire;

// ─── Handlers ────────────────────────────────────────────────────────────────

/// The dense handler-id space, resolved once at startup.
#[derive(Debug)]
struct Handlers {
    registry: HandlerRegistry,
    unreachable: HandlerId,
    na_input: HandlerId,
    learn: HandlerId,
    ns_output: HandlerId,
    ip6_output: HandlerId,
}

impl Handlers {
    fn new() -> Self {
        let mut registry = HandlerRegistry::new();
        let unreachable = registry.register("nh6-unreachable");
        let na_input = registry.register("ndp-na-input");
        let learn = registry.register("ndp-learn");
        let ns_output = registry.register("ndp-ns-output");
        let ip6_output = registry.register("ip6-output");
        Handlers {
            registry,
            unreachable,
            na_input,
            learn,
            ns_output,
            ip6_output,
        }
    }
}

// ─── Service ─────────────────────────────────────────────────────────────────

/// The neighbor-discovery control-plane state, mutated only by its owner
/// thread.
pub struct NdpService {
    cfg: NdpConfig,
    clock: TickClock,
    resolver: Resolver,
    pool: Nh6Pool,
    routes: Arc<RouteTable>,
    ifaces: Arc<IfaceTable>,
    control_rx: StackConsumer,
    control_port: StackPort,
    graph_port: StackPort,
    handlers: Handlers,
    stats: NdpStats,
    last_sweep: Tick,
}

impl NdpService {
    /// Build the service. Returns the graph-side consumer — the "graph
    /// input node" that re-injects control-plane output into the
    /// forwarding graph.
    pub fn new(cfg: NdpConfig, ifaces: IfaceTable) -> Result<(Self, StackConsumer), Error> {
        cfg.validate()?;
        let (control_port, control_rx) = stack_ring(cfg.ring_depth);
        let (graph_port, graph_rx) = stack_ring(cfg.ring_depth);
        let resolver = Resolver::new(ResolverConfig::from(&cfg));
        let service = NdpService {
            clock: TickClock::new(cfg.tick_hz),
            resolver,
            pool: Nh6Pool::new(cfg.num_nexthops),
            routes: Arc::new(RouteTable::new()),
            ifaces: Arc::new(ifaces),
            control_rx,
            control_port,
            graph_port,
            handlers: Handlers::new(),
            stats: NdpStats::default(),
            last_sweep: 0,
            cfg,
        };
        Ok((service, graph_rx))
    }

    /// A worker-side handle: route/iface readers plus the control port.
    pub fn datapath(&self) -> Datapath {
        Datapath::new(
            self.ifaces.clone(),
            self.control_port.clone(),
            DatapathHandlers {
                unreachable: self.handlers.unreachable,
                na_input: self.handlers.na_input,
                learn: self.handlers.learn,
            },
        )
    }

    pub fn routes(&self) -> Arc<RouteTable> {
        self.routes.clone()
    }

    pub fn pool(&self) -> &Nh6Pool {
        &self.pool
    }

    pub fn stats(&self) -> &NdpStats {
        &self.stats
    }

    pub fn config(&self) -> &NdpConfig {
        &self.cfg
    }

    pub fn now(&self) -> Tick {
        self.clock.now()
    }

    /// Resolve a registered handler name, for wiring external graph nodes.
    pub fn resolve_handler(&self, name: &str) -> Option<HandlerId> {
        self.handlers.registry.resolve(name)
    }

    /// Point a route at an existing next-hop, taking a reference on its
    /// behalf.
    pub fn install_route(
        &mut self,
        vrf: trellis_common::types::VrfId,
        iface: IfaceId,
        prefix: std::net::Ipv6Addr,
        len: u8,
        nh: crate::pool::NhIndex,
    ) -> Result<(), Error> {
        self.routes.insert(vrf, iface, prefix, len, nh)?;
        self.pool.incref(nh);
        Ok(())
    }

    /// Remove a route, dropping its next-hop reference; the record is
    /// reclaimed when this was the last one.
    pub fn remove_route(
        &mut self,
        vrf: trellis_common::types::VrfId,
        iface: IfaceId,
        prefix: std::net::Ipv6Addr,
        len: u8,
    ) -> Result<(), Error> {
        let nh = self.routes.remove(vrf, iface, &prefix, len)?;
        if let Some(freed) = self.pool.decref(nh) {
            debug!(addr = ?freed.key.addr, "next-hop reclaimed with its last route");
        }
        Ok(())
    }

    /// Wire an interface's addresses into the subsystem: one LOCAL|LINK
    /// next-hop per address, the connected prefix route, and the
    /// interface-scoped link-local route.
    pub fn connect_iface(&mut self, id: IfaceId) -> Result<(), Error> {
        let iface = self
            .ifaces
            .iface_from_id(id)
            .ok_or(Error::NotFound)?
            .clone();
        for (addr, plen) in &iface.addrs {
            let idx = self.pool.create(NhKey {
                vrf: iface.vrf,
                iface: id,
                addr: *addr,
            })?;
            if let Some(nh) = self.pool.get_mut(idx) {
                nh.flags = NhFlags::LOCAL | NhFlags::LINK | NhFlags::REACHABLE;
                nh.lladdr = Some(iface.mac);
            }
            self.install_route(iface.vrf, IfaceId::UNDEF, *addr, *plen, idx)?;
        }
        if !iface.link_local.is_unspecified() {
            let idx = self.pool.create(NhKey {
                vrf: iface.vrf,
                iface: id,
                addr: iface.link_local,
            })?;
            if let Some(nh) = self.pool.get_mut(idx) {
                nh.flags = NhFlags::LOCAL | NhFlags::LINK | NhFlags::REACHABLE;
                nh.lladdr = Some(iface.mac);
            }
            self.install_route(
                iface.vrf,
                id,
                std::net::Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0),
                64,
                idx,
            )?;
        }
        Ok(())
    }

    /// One event-loop iteration at the current tick.
    pub fn poll(&mut self) {
        self.poll_at(self.clock.now());
    }

    /// One event-loop iteration at an explicit tick (tests drive this).
    pub fn poll_at(&mut self, now: Tick) {
        while let Some(msg) = self.control_rx.try_recv() {
            self.dispatch(msg, now);
        }
        if now != self.last_sweep {
            let mut out = Vec::new();
            self.resolver.on_tick(&mut self.pool, now, &mut out);
            self.perform(out);
            self.last_sweep = now;
        }
    }

    /// Execute a management request.
    pub fn handle_api(&mut self, req: &ApiRequest) -> ApiResponse {
        let now = self.clock.now();
        match req {
            ApiRequest::Nh6Add(body) => {
                let result = api::nh6_add(
                    &mut self.pool,
                    &self.routes,
                    self.ifaces.as_ref(),
                    self.cfg.max_vrfs,
                    now,
                    &body.nexthop,
                    body.exist_ok,
                );
                ApiResponse::status(status_of(&result))
            }
            ApiRequest::Nh6Del(body) => {
                let result = api::nh6_del(
                    &mut self.pool,
                    &self.routes,
                    body.vrf,
                    body.host,
                    body.missing_ok,
                );
                ApiResponse::status(status_of(&result))
            }
            ApiRequest::Nh6List(body) => ApiResponse::listing(api::nh6_list(
                &self.pool,
                body.vrf,
                now,
                self.cfg.tick_hz,
            )),
        }
    }

    // ── Ring dispatch ────────────────────────────────────────────────

    fn dispatch(&mut self, msg: StackMsg, now: Tick) {
        let StackMsg { handler, pkt } = msg;
        if handler == self.handlers.unreachable {
            self.handle_miss(pkt, now);
        } else if handler == self.handlers.na_input {
            self.handle_na(pkt, now);
        } else if handler == self.handlers.learn {
            self.handle_learn(pkt, now);
        } else {
            warn!(
                handler = self.handlers.registry.name(handler).unwrap_or("?"),
                "message for a handler this thread does not own"
            );
        }
    }

    fn handle_miss(&mut self, pkt: Pkt, now: Tick) {
        let mut out = Vec::new();
        unreachable::handle_miss(&mut self.pool, &self.routes, &self.resolver, now, pkt, &mut out);
        let held = !out
            .iter()
            .any(|a| matches!(a, NhAction::Forward(_) | NhAction::Drop(..)));
        if held {
            self.stats.held += 1;
        }
        self.perform(out);
    }

    /// A validated advertisement from the datapath: record the link-layer
    /// address on the targeted next-hop and flush its hold queue.
    fn handle_na(&mut self, pkt: Pkt, now: Tick) {
        self.stats.na_rx += 1;
        let Ok(hdr) = wire::Ipv6Header::parse(&pkt.data) else {
            self.stats.drops.record(DropReason::Invalid);
            return;
        };
        let Ok(icmp) = hdr.icmp_slice(&pkt.data) else {
            self.stats.drops.record(DropReason::Invalid);
            return;
        };
        let Ok(na) = wire::NeighborAdvert::parse(icmp) else {
            self.stats.drops.record(DropReason::Invalid);
            return;
        };
        let Some(lladdr) = na.target_lladdr else {
            // Nothing to learn from an advert without the option.
            trace!(target = %na.target, "advert without target-lladdr ignored");
            return;
        };
        self.confirm_neighbor(pkt.meta.vrf, pkt.meta.iface, na.target, lladdr, now, false);
    }

    /// A solicitation copy whose target field carries the peer address:
    /// learn (or refresh) the peer as a reachable neighbor.
    fn handle_learn(&mut self, pkt: Pkt, now: Tick) {
        let Some(ns) = pkt
            .data
            .get(wire::IPV6_HEADER_LEN..)
            .and_then(|icmp| wire::NeighborSolicit::parse(icmp).ok())
        else {
            self.stats.drops.record(DropReason::Invalid);
            return;
        };
        let Some(lladdr) = ns.source_lladdr else {
            return;
        };
        self.stats.learns += 1;
        self.confirm_neighbor(pkt.meta.vrf, pkt.meta.iface, ns.target, lladdr, now, true);
    }

    /// Shared tail of NA input and gratuitous-NS learning.
    fn confirm_neighbor(
        &mut self,
        vrf: trellis_common::types::VrfId,
        iface: IfaceId,
        addr: std::net::Ipv6Addr,
        lladdr: trellis_common::types::MacAddr,
        now: Tick,
        create: bool,
    ) {
        let idx = match self.pool.lookup(vrf, iface, addr) {
            Some(idx) => idx,
            None => match self.pool.lookup(vrf, IfaceId::UNDEF, addr) {
                Some(idx) => idx,
                None if create => {
                    match self.pool.create(NhKey { vrf, iface, addr }) {
                        Ok(idx) => {
                            // Neighbors materialized by resolution get their
                            // host route immediately.
                            if self
                                .routes
                                .lookup_exact(vrf, IfaceId::UNDEF, &addr, 128)
                                .is_none()
                                && self
                                    .routes
                                    .insert(vrf, IfaceId::UNDEF, addr, 128, idx)
                                    .is_ok()
                            {
                                self.pool.incref(idx);
                            }
                            idx
                        }
                        Err(err) => {
                            debug!(%err, %addr, "cannot learn neighbor");
                            return;
                        }
                    }
                }
                None => {
                    trace!(%addr, "advert for an unknown next-hop ignored");
                    return;
                }
            },
        };

        let was_reachable = self
            .pool
            .get(idx)
            .is_some_and(|nh| nh.flags.contains(NhFlags::REACHABLE));
        let mut out = Vec::new();
        self.resolver.on_advert(&mut self.pool, idx, lladdr, now, &mut out);
        if !was_reachable
            && self
                .pool
                .get(idx)
                .is_some_and(|nh| nh.flags.contains(NhFlags::REACHABLE))
        {
            self.stats.resolved += 1;
        }
        self.perform(out);
    }

    // ── Action execution ─────────────────────────────────────────────

    fn perform(&mut self, actions: Vec<NhAction>) {
        for action in actions {
            match action {
                NhAction::Probe { nh, unicast } => {
                    let Some(record) = self.pool.get(nh) else { continue };
                    match probe::build_probe(self.ifaces.as_ref(), record, unicast) {
                        Ok(pkt) => match self.graph_port.post(self.handlers.ns_output, pkt) {
                            Ok(()) => self.stats.ns_tx += 1,
                            Err(PostError::Again(_)) | Err(PostError::Closed(_)) => {
                                self.stats.drops.record(DropReason::RingFull);
                            }
                        },
                        Err(err) => {
                            debug!(%err, nh = %nh, "probe emission failed");
                            self.stats.probe_errors += 1;
                        }
                    }
                }
                NhAction::Forward(pkt) => {
                    match self.graph_port.post(self.handlers.ip6_output, pkt) {
                        Ok(()) => self.stats.flushed += 1,
                        Err(PostError::Again(_)) | Err(PostError::Closed(_)) => {
                            self.stats.drops.record(DropReason::RingFull);
                        }
                    }
                }
                NhAction::Drop(pkt, reason) => {
                    self.stats.drops.record(reason);
                    drop(pkt);
                }
                NhAction::Failed(nh) => {
                    self.stats.failed += 1;
                    trace!(nh = %nh, "next-hop marked failed");
                }
            }
        }
    }
}

// ─── Runtime ─────────────────────────────────────────────────────────────────

enum Command {
    Api(ApiRequest, Sender<ApiResponse>),
    Stats(Sender<NdpStats>),
    Shutdown,
}

/// Thread-safe handle to the control thread.
///
/// Owns the background thread running the service loop. API calls are
/// synchronous from the caller's perspective; dropping the runtime shuts
/// the thread down.
pub struct NdpRuntime {
    cmd: Sender<Command>,
    handle: Option<thread::JoinHandle<()>>,
}

impl NdpRuntime {
    /// Spawn the control thread around a configured service.
    pub fn spawn(service: NdpService) -> anyhow::Result<Self> {
        let (cmd_tx, cmd_rx) = bounded(64);
        let handle = thread::Builder::new()
            .name("ndp-control".into())
            .spawn(move || control_loop(service, cmd_rx))?;
        Ok(NdpRuntime {
            cmd: cmd_tx,
            handle: Some(handle),
        })
    }

    /// Execute a management request on the control thread.
    pub fn api(&self, req: ApiRequest) -> anyhow::Result<ApiResponse> {
        let (tx, rx) = bounded(1);
        self.cmd
            .send(Command::Api(req, tx))
            .map_err(|_| anyhow::anyhow!("control thread is gone"))?;
        Ok(rx.recv()?)
    }

    /// Snapshot the control-thread counters.
    pub fn stats(&self) -> anyhow::Result<NdpStats> {
        let (tx, rx) = bounded(1);
        self.cmd
            .send(Command::Stats(tx))
            .map_err(|_| anyhow::anyhow!("control thread is gone"))?;
        Ok(rx.recv()?)
    }

    /// Gracefully stop the control thread. Idempotent.
    pub fn shutdown(&mut self) {
        let _ = self.cmd.send(Command::Shutdown);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for NdpRuntime {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn control_loop(mut service: NdpService, cmd_rx: Receiver<Command>) {
    loop {
        match cmd_rx.recv_timeout(Duration::from_millis(10)) {
            Ok(Command::Api(req, reply)) => {
                let resp = service.handle_api(&req);
                let _ = reply.send(resp);
            }
            Ok(Command::Stats(reply)) => {
                let _ = reply.send(service.stats.clone());
            }
            Ok(Command::Shutdown) => break,
            Err(crossbeam_channel::RecvTimeoutError::Timeout) => {}
            Err(crossbeam_channel::RecvTimeoutError::Disconnected) => break,
        }
        service.poll();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use trellis_common::error::codes;
    use trellis_common::protocol::{Nh6AddPayload, Nh6ListPayload, NexthopSpec};
    use trellis_common::types::MacAddr;

    use crate::iface::Iface;

    fn ifaces() -> IfaceTable {
        let mut table = IfaceTable::new();
        table.insert(Iface {
            id: IfaceId(5),
            name: "eth5".into(),
            vrf: 0,
            mac: "02:00:00:00:00:05".parse().unwrap(),
            link_local: "fe80::5".parse().unwrap(),
            addrs: vec![("2001:db8::a".parse().unwrap(), 64)],
        });
        table
    }

    #[test]
    fn connect_iface_installs_connected_routes() {
        let (mut svc, _graph) = NdpService::new(NdpConfig::default(), ifaces()).unwrap();
        svc.connect_iface(IfaceId(5)).unwrap();

        let routes = svc.routes();
        let subnet = routes.lookup(0, IfaceId(5), &"2001:db8::1".parse().unwrap());
        assert!(subnet.is_some());
        let ll = routes.lookup(0, IfaceId(5), &"fe80::2".parse().unwrap());
        assert!(ll.is_some());
        // Link-local route is scoped to the interface.
        assert_eq!(routes.lookup(0, IfaceId(6), &"fe80::2".parse().unwrap()), None);

        let nh = svc.pool().get(subnet.unwrap()).unwrap();
        assert!(nh.flags.contains(NhFlags::LINK | NhFlags::LOCAL));
    }

    #[test]
    fn runtime_answers_api_calls() {
        let (mut svc, _graph) = NdpService::new(NdpConfig::default(), ifaces()).unwrap();
        svc.connect_iface(IfaceId(5)).unwrap();
        let mut runtime = NdpRuntime::spawn(svc).unwrap();

        let resp = runtime
            .api(ApiRequest::Nh6Add(Nh6AddPayload {
                nexthop: NexthopSpec {
                    vrf: 0,
                    iface: IfaceId(5),
                    ipv6: "2001:db8::7".parse().unwrap(),
                    mac: "52:54:00:aa:bb:cc".parse().unwrap(),
                    flags: NhFlags::empty(),
                },
                exist_ok: false,
            }))
            .unwrap();
        assert_eq!(resp.status, codes::OK);

        let listing = runtime
            .api(ApiRequest::Nh6List(Nh6ListPayload { vrf: 0 }))
            .unwrap();
        let infos = listing.nexthops.unwrap();
        let added = infos
            .iter()
            .find(|i| i.ipv6 == "2001:db8::7".parse::<std::net::Ipv6Addr>().unwrap())
            .expect("added next-hop listed");
        assert_eq!(added.mac, "52:54:00:aa:bb:cc".parse::<MacAddr>().unwrap());
        assert!(added.flags.contains(NhFlags::STATIC | NhFlags::REACHABLE));

        let stats = runtime.stats().unwrap();
        assert_eq!(stats.drops.total(), 0);
        runtime.shutdown();
    }
}
