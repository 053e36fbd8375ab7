//! The bridge loop.
//!
//! One task owns the [BridgeContext] and runs the phases of an iteration in
//! a fixed order:
//!
//! 1. uplink: probe, escalate to a restart after sustained loss
//! 2. Modbus peer: reconnect, read the power demand, write the status block
//! 3. bus: answer local Modbus server and HTTP requests
//! 4. heat pump: reconnect, or apply the pending power demand and `update()`
//! 5. record device contact and confirm the pending demand
//!
//! Link failures never leave an iteration. They become supervisor state.

use std::{fmt, time::Duration};

use log::{debug, error, info, warn};
use tokio::{task::yield_now, time::{sleep, Instant}};

use crate::bus::{BridgeRequest, BridgeRequests, FormFields, PageVariables};
use crate::config::BridgeConfig;
use crate::heatpump::HeatPump;
use crate::link::{Link, LinkSupervisor};
use crate::peer::ModbusPeer;
use crate::protocol::{addresses::*, registers::*, settings::Power};
use crate::reconciler::CommandReconciler;
use crate::web::{self, PageContext};


/// Why the bridge loop stopped. The process is expected to restart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Restart {
    /// The uplink stayed down for the whole retry window.
    UplinkLost { down_for: Duration },

    /// A client wrote a nonzero value to a reset/reboot coil.
    Requested { coil: u16 },
}

impl fmt::Display for Restart {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Restart::UplinkLost { down_for } => write!(f, "uplink lost for {down_for:?}"),
            Restart::Requested { coil: COIL_RESET } => write!(f, "reset requested"),
            Restart::Requested { coil } => write!(f, "reboot requested (coil {coil})"),
        }
    }
}


/// All state of the bridge. Only the bridge loop touches it.
pub struct BridgeContext<H, P, U> {
    pub hp: H,
    /// `None` when no Modbus peer is configured.
    pub peer: Option<P>,
    pub uplink: U,

    pub uplink_link: LinkSupervisor,
    pub peer_link: LinkSupervisor,
    pub device_link: LinkSupervisor,

    pub reconciler: CommandReconciler,

    pub started_at: Instant,
    pub last_device_contact: Option<Instant>,

    last_peer_read: Option<Instant>,
    last_peer_write: Option<Instant>,
    restart: Option<Restart>,
}

impl<H: HeatPump, P: ModbusPeer, U: Link> BridgeContext<H, P, U> {
    pub fn new(config: &BridgeConfig, hp: H, peer: Option<P>, uplink: U, now: Instant) -> Self {
        Self {
            hp,
            peer,
            uplink,
            uplink_link: LinkSupervisor::new("uplink", config.uplink_policy(), now),
            peer_link: LinkSupervisor::new("modbus peer", config.peer_policy(), now),
            device_link: LinkSupervisor::new("heat pump", config.device_policy(), now),
            reconciler: CommandReconciler::new(config.freshness),
            started_at: now,
            last_device_contact: None,
            last_peer_read: None,
            last_peer_write: None,
            restart: None
        }
    }

    pub fn since_contact(&self, now: Instant) -> Option<Duration> {
        elapsed_since(self.last_device_contact, now)
    }

    /// Current value of holding register `address`, as served to local clients.
    pub fn holding_register(&self, address: u16, now: Instant) -> Result<u16, RejectedRead> {
        if address == HOLDING_POWER_DEMAND {
            return Ok(encode_power_demand(self.reconciler.command().target_power));
        }

        holding_register(address, &self.hp.settings(), self.since_contact(now))
    }

    pub fn page_variables(&self, now: Instant) -> PageVariables {
        let settings = self.hp.settings();

        web::variables(&PageContext {
            settings: &settings,
            now,
            started_at: self.started_at,
            last_device_contact: self.last_device_contact,
            uplink: self.uplink_link.status(),
            peer: self.peer.as_ref().map(|_| self.peer_link.status()),
        })
    }
}


fn elapsed_since(last: Option<Instant>, now: Instant) -> Option<Duration> {
    last.map(|at| now.saturating_duration_since(at))
}

fn interval_elapsed(last: Option<Instant>, interval: Duration, now: Instant) -> bool {
    elapsed_since(last, now).map_or(true, |elapsed| elapsed >= interval)
}

fn in_range(address: u16, count: usize, len: u16) -> bool {
    count > 0 && address as usize + count <= len as usize
}


pub struct Bridge<H, P, U> {
    config: BridgeConfig,
    ctx: BridgeContext<H, P, U>,
    requests: BridgeRequests,
}

impl<H: HeatPump, P: ModbusPeer, U: Link> Bridge<H, P, U> {
    pub fn new(config: BridgeConfig, hp: H, peer: Option<P>, uplink: U, requests: BridgeRequests) -> Self {
        let ctx = BridgeContext::new(&config, hp, peer, uplink, Instant::now());

        Self { config, ctx, requests }
    }

    pub fn context(&self) -> &BridgeContext<H, P, U> {
        &self.ctx
    }

    pub fn context_mut(&mut self) -> &mut BridgeContext<H, P, U> {
        &mut self.ctx
    }

    /// Run iterations until a restart is needed.
    pub async fn run(&mut self) -> Restart {
        info!("bridge loop started");

        loop {
            if let Some(restart) = self.iterate(Instant::now()).await {
                error!("restarting: {restart}");
                return restart;
            }

            sleep(self.config.loop_interval).await;
        }
    }

    /// One pass over all phases.
    pub async fn iterate(&mut self, now: Instant) -> Option<Restart> {
        if let Some(restart) = self.uplink_phase(now).await {
            return Some(restart);
        }
        yield_now().await;

        self.peer_phase(now).await;
        yield_now().await;

        self.service_requests(now).await;
        if let Some(restart) = self.ctx.restart.take() {
            return Some(restart);
        }
        yield_now().await;

        // a fresh connect counts as contact and confirms against the last known state
        if self.device_phase(now).await {
            self.ctx.last_device_contact = Some(now);
            let observed = self.ctx.hp.settings().power;
            self.ctx.reconciler.confirm(observed);
        }

        None
    }

    async fn uplink_phase(&mut self, now: Instant) -> Option<Restart> {
        let ctx = &mut self.ctx;

        if !ctx.uplink_link.is_connected() {
            ctx.uplink_link.ensure_connected(&mut ctx.uplink, now).await;
        } else if ctx.uplink_link.due(now) {
            ctx.uplink_link.record_attempt(now);

            match ctx.uplink.connect().await {
                Ok(()) => ctx.uplink_link.record_success(now),
                Err(err) => ctx.uplink_link.drop_link(&mut ctx.uplink, now, &err).await,
            }
        }

        if !ctx.uplink_link.is_fatal(now) {
            return None;
        }

        let down_for = ctx.uplink_link.disconnected_for(now).unwrap_or_default();
        error!("uplink down for {down_for:?}, shutting down the heat pump before restarting");

        self.safe_shutdown().await;

        Some(Restart::UplinkLost { down_for })
    }

    async fn peer_phase(&mut self, now: Instant) {
        let ctx = &mut self.ctx;

        let Some(peer) = ctx.peer.as_mut() else {
            return;
        };

        // the peer is only reachable through the uplink
        if !ctx.uplink_link.is_connected() {
            return;
        }

        if !ctx.peer_link.ensure_connected(peer, now).await {
            return;
        }

        if interval_elapsed(ctx.last_peer_read, self.config.peer_read_interval, now) {
            ctx.last_peer_read = Some(now);

            match crate::with_retries!(ctx.peer_link, peer.read_demand()) {
                Ok(raw) => {
                    ctx.peer_link.record_success(now);

                    match decode(HOLDING_POWER_DEMAND, raw) {
                        Ok(DecodedCommand::Power(power)) => ctx.reconciler.observe(power, now),
                        Err(rejected) => warn!("ignoring power demand {raw}: {rejected}"),
                    }
                },
                Err(err) => {
                    warn!("failed to read power demand from modbus peer: {err}");
                    ctx.peer_link.drop_link(peer, now, &err).await;
                    return;
                }
            }
        }

        if interval_elapsed(ctx.last_peer_write, self.config.peer_write_interval, now) {
            ctx.last_peer_write = Some(now);

            let status = encode(&ctx.hp.settings(), elapsed_since(ctx.last_device_contact, now));

            match crate::with_retries!(ctx.peer_link, peer.write_status(&status)) {
                Ok(()) => {
                    debug!("status written to modbus peer: {status:?}");
                    ctx.peer_link.record_success(now);
                },
                Err(err) => {
                    warn!("failed to write status to modbus peer: {err}");
                    ctx.peer_link.drop_link(peer, now, &err).await;
                }
            }
        }
    }

    async fn service_requests(&mut self, now: Instant) {
        while let Some(request) = self.requests.try_next() {
            self.handle_request(request, now).await;
        }
    }

    async fn handle_request(&mut self, request: BridgeRequest, now: Instant) {
        match request {
            BridgeRequest::ReadCoils { address, count, reply } => {
                let result = if in_range(address, count as usize, COILS_LEN) {
                    // reset/reboot triggers always read back as 0
                    Ok(vec![false; count as usize])
                } else {
                    Err(RejectedRead(address))
                };
                let _ = reply.send(result);
            },
            BridgeRequest::WriteCoils { address, values, reply } => {
                let result = self.write_coils(address, &values);
                let _ = reply.send(result);
            },
            BridgeRequest::ReadHolding { address, count, reply } => {
                let result = if in_range(address, count as usize, HOLDING_LEN) {
                    (address..address + count)
                        .map(|address| self.ctx.holding_register(address, now))
                        .collect()
                } else {
                    Err(RejectedRead(address))
                };
                let _ = reply.send(result);
            },
            BridgeRequest::WriteHolding { address, values, reply } => {
                let result = self.write_holding(address, &values, now);
                let _ = reply.send(result);
            },
            BridgeRequest::Page { form, reply } => {
                self.apply_form(&form, now).await;
                let _ = reply.send(self.ctx.page_variables(now));
            },
        }
    }

    fn write_coils(&mut self, address: u16, values: &[bool]) -> Result<(), RejectedWrite> {
        if !in_range(address, values.len(), COILS_LEN) {
            return Err(RejectedWrite::UnknownAddress);
        }

        if let Some(offset) = values.iter().position(|value| *value) {
            let coil = address + offset as u16;
            warn!("restart requested through coil {coil}");
            self.ctx.restart.get_or_insert(Restart::Requested { coil });
        }

        Ok(())
    }

    /// A local write of the power demand register counts as a fresh peer read.
    fn write_holding(&mut self, address: u16, values: &[u16], now: Instant) -> Result<(), RejectedWrite> {
        if values.is_empty() {
            return Err(RejectedWrite::UnknownAddress);
        }

        // validate the whole request before applying any of it
        let commands = values.iter()
            .enumerate()
            .map(|(offset, value)| {
                u16::try_from(address as usize + offset)
                    .map_err(|_| RejectedWrite::UnknownAddress)
                    .and_then(|address| decode(address, *value))
            })
            .collect::<Result<Vec<_>, _>>()?;

        for command in commands {
            match command {
                DecodedCommand::Power(power) => {
                    info!("power demand {power} written by local modbus client");
                    self.ctx.reconciler.observe(power, now);
                }
            }
        }

        Ok(())
    }

    /// Merge an HTTP form into the device settings and push them to the heat pump straight away.
    async fn apply_form(&mut self, form: &FormFields, now: Instant) {
        let ctx = &mut self.ctx;

        let mut settings = ctx.hp.settings();
        if !web::apply_form(&mut settings, form) {
            return;
        }

        info!("settings changed from web ui: {settings:?}");
        ctx.hp.set_settings(&settings);

        if !ctx.device_link.is_connected() {
            debug!("heat pump not connected, settings staged for the next update");
            return;
        }

        match crate::with_retries!(ctx.device_link, ctx.hp.update()) {
            Ok(()) => {
                ctx.device_link.record_success(now);
                ctx.last_device_contact = Some(now);
            },
            Err(err) => {
                warn!("failed to update heat pump after web ui change: {err}");
                ctx.device_link.drop_link(&mut ctx.hp, now, &err).await;
            }
        }
    }

    /// Returns whether the heat pump was reached (connected or updated).
    async fn device_phase(&mut self, now: Instant) -> bool {
        let ctx = &mut self.ctx;

        if !ctx.device_link.is_connected() {
            return ctx.device_link.ensure_connected(&mut ctx.hp, now).await;
        }

        match ctx.reconciler.due(now) {
            Ok(Some(power)) => {
                debug!("applying power demand {power}");
                ctx.hp.set_power(power);
            },
            Ok(None) => {},
            Err(stale) => debug!("{stale}, power demand withheld"),
        }

        match crate::with_retries!(ctx.device_link, ctx.hp.update()) {
            Ok(()) => {
                ctx.device_link.record_success(now);
                true
            },
            Err(err) => {
                ctx.device_link.drop_link(&mut ctx.hp, now, &err).await;
                false
            }
        }
    }

    /// Best effort: power the heat pump off.
    async fn safe_shutdown(&mut self) -> bool {
        let hp = &mut self.ctx.hp;

        if !hp.is_connected() {
            if let Err(err) = hp.connect().await {
                error!("heat pump not shut down, connect failed: {err}");
                return false;
            }
        }

        hp.set_power(Power::Off);

        match hp.update().await {
            Ok(()) => {
                info!("heat pump shut down");
                true
            },
            Err(err) => {
                error!("heat pump not shut down, update failed: {err}");
                false
            }
        }
    }
}


#[cfg(test)]
mod tests {
    use std::future::Future;

    use tokio::time::advance;

    use super::*;
    use crate::bus::{self, BridgeHandle};
    use crate::heatpump::SimulatedHeatPump;
    use crate::link::LinkError;
    use crate::protocol::settings::{Mode, MODE_TABLE};

    const STEP: Duration = Duration::from_millis(100);

    #[derive(Default)]
    struct MockPeer {
        demand: u16,
        fail: bool,
        connects: u32,
        resets: u32,
        /// Successful reads.
        reads: u32,
        read_attempts: u32,
        write_attempts: u32,
        status: Option<[u16; HOLDING_WRITE_COUNT]>,
    }

    impl MockPeer {
        fn new(demand: u16) -> Self {
            Self { demand, ..Self::default() }
        }

        fn check(&self) -> Result<(), LinkError> {
            if self.fail { Err(LinkError::Transport("peer unreachable".to_string())) } else { Ok(()) }
        }
    }

    impl Link for MockPeer {
        async fn connect(&mut self) -> Result<(), LinkError> {
            self.connects += 1;
            self.check()
        }

        async fn reset(&mut self) {
            self.resets += 1;
        }
    }

    impl ModbusPeer for MockPeer {
        async fn read_demand(&mut self) -> Result<u16, LinkError> {
            self.read_attempts += 1;
            self.check()?;
            self.reads += 1;
            Ok(self.demand)
        }

        async fn write_status(&mut self, values: &[u16; HOLDING_WRITE_COUNT]) -> Result<(), LinkError> {
            self.write_attempts += 1;
            self.check()?;
            self.status = Some(*values);
            Ok(())
        }
    }

    struct MockUplink {
        up: bool,
    }

    impl Link for MockUplink {
        async fn connect(&mut self) -> Result<(), LinkError> {
            if self.up { Ok(()) } else { Err(LinkError::Timeout(Duration::from_secs(1))) }
        }

        async fn reset(&mut self) {}
    }

    type TestBridge = Bridge<SimulatedHeatPump, MockPeer, MockUplink>;

    fn bridge(peer: Option<MockPeer>, uplink_up: bool) -> (TestBridge, BridgeHandle) {
        let (handle, requests) = bus::channel(8);
        let bridge = Bridge::new(BridgeConfig::default(), SimulatedHeatPump::default(), peer, MockUplink { up: uplink_up }, requests);

        (bridge, handle)
    }

    async fn steps(bridge: &mut TestBridge, count: usize, step: Duration) {
        for _ in 0..count {
            assert_eq!(bridge.iterate(Instant::now()).await, None);
            advance(step).await;
        }
    }

    /// Run the bridge until the client future completes.
    async fn call<T: Send + 'static>(bridge: &mut TestBridge, client: impl Future<Output = T> + Send + 'static) -> T {
        let client = tokio::spawn(client);

        while !client.is_finished() {
            bridge.iterate(Instant::now()).await;
            advance(STEP).await;
        }

        client.await.unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn test_power_demand_converges() {
        let (mut bridge, _handle) = bridge(Some(MockPeer::new(1)), true);

        steps(&mut bridge, 15, STEP).await;

        let now = Instant::now();
        let ctx = bridge.context();
        assert_eq!(ctx.hp.settings().power, Some(Power::On));
        assert!(!ctx.reconciler.command().pending);
        assert_eq!(ctx.hp.power_writes, 1);
        assert_eq!(ctx.holding_register(HOLDING_POWER, now), Ok(1));
        assert_eq!(ctx.holding_register(HOLDING_POWER_DEMAND, now), Ok(1));

        // the status block went out to the peer after the device was synced
        let status = ctx.peer.as_ref().unwrap().status.unwrap();
        assert_eq!(status[(HOLDING_POWER - HOLDING_READ_COUNT) as usize], 1);
        assert_eq!(status[(HOLDING_CONNECTED - HOLDING_READ_COUNT) as usize], 1);

        // one power write per distinct demand
        bridge.context_mut().peer.as_mut().unwrap().demand = 0;
        steps(&mut bridge, 15, STEP).await;

        let ctx = bridge.context();
        assert_eq!(ctx.hp.settings().power, Some(Power::Off));
        assert_eq!(ctx.hp.power_writes, 2);
        assert!(!ctx.reconciler.command().pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_peer_read_cadence() {
        let (mut bridge, _handle) = bridge(Some(MockPeer::new(0)), true);

        // 0ms, 1000ms, 2000ms
        steps(&mut bridge, 25, STEP).await;
        assert_eq!(bridge.context().peer.as_ref().unwrap().reads, 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_read_drops_peer_and_skips_write() {
        let start = Instant::now();
        let (mut bridge, _handle) = bridge(Some(MockPeer::new(0)), true);

        steps(&mut bridge, 3, STEP).await;
        let peer = bridge.context().peer.as_ref().unwrap();
        assert_eq!((peer.connects, peer.read_attempts, peer.write_attempts), (1, 1, 1));

        bridge.context_mut().peer.as_mut().unwrap().fail = true;
        advance((start + Duration::from_secs(1)).saturating_duration_since(Instant::now())).await;

        // one read, retried, then the session is reset and the write skipped
        let lost = Instant::now();
        assert_eq!(bridge.iterate(lost).await, None);

        let ctx = bridge.context();
        let peer = ctx.peer.as_ref().unwrap();
        assert_eq!(peer.read_attempts, 1 + 3);
        assert_eq!(peer.resets, 1);
        assert_eq!(peer.write_attempts, 1);
        assert!(!ctx.peer_link.is_connected());

        bridge.context_mut().peer.as_mut().unwrap().fail = false;

        while Instant::now() < lost + Duration::from_secs(1) {
            assert_eq!(bridge.iterate(Instant::now()).await, None);
            assert!(!bridge.context().peer_link.is_connected());
            advance(STEP).await;
        }
        assert_eq!(bridge.context().peer.as_ref().unwrap().connects, 1);

        steps(&mut bridge, 1, STEP).await;

        let ctx = bridge.context();
        let peer = ctx.peer.as_ref().unwrap();
        assert!(ctx.peer_link.is_connected());
        assert_eq!(peer.connects, 2);
        assert_eq!(peer.reads, 2);
        assert_eq!(peer.write_attempts, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stale_demand_is_not_applied() {
        let (mut bridge, _handle) = bridge(Some(MockPeer::new(1)), true);
        bridge.context_mut().hp.fail_next = u32::MAX;

        // demand is read once, then the peer goes away
        steps(&mut bridge, 1, STEP).await;
        assert_eq!(bridge.context().reconciler.command().target_power, Power::On);
        bridge.context_mut().peer.as_mut().unwrap().fail = true;

        steps(&mut bridge, 61, Duration::from_secs(1)).await;
        assert!(!bridge.context().peer_link.is_connected());

        // the heat pump comes back after the freshness window
        bridge.context_mut().hp.fail_next = 0;
        steps(&mut bridge, 5, Duration::from_secs(1)).await;

        let ctx = bridge.context();
        assert!(ctx.device_link.is_connected());
        assert_eq!(ctx.hp.settings().power, Some(Power::Off));
        assert_eq!(ctx.hp.power_writes, 0);
        assert!(ctx.reconciler.command().pending);

        // a new read refreshes the demand
        bridge.context_mut().peer.as_mut().unwrap().fail = false;
        steps(&mut bridge, 5, Duration::from_secs(1)).await;

        let ctx = bridge.context();
        assert_eq!(ctx.hp.settings().power, Some(Power::On));
        assert_eq!(ctx.hp.power_writes, 1);
        assert!(!ctx.reconciler.command().pending);
    }

    #[tokio::test(start_paused = true)]
    async fn test_web_form_updates_device() {
        let (mut bridge, handle) = bridge(None, true);
        steps(&mut bridge, 3, STEP).await;

        let form: FormFields = [("MODE", "COOL"), ("TEMP", "22")].iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();

        let variables = call(&mut bridge, async move { handle.page(form).await }).await.unwrap();
        assert_eq!(variables["MODE_C"], "checked");
        assert_eq!(variables["MODE_A"], "");
        assert_eq!(variables["MODBUS_INFO"], "Modbus client disabled.");

        let now = Instant::now();
        let ctx = bridge.context();
        assert_eq!(ctx.hp.settings().mode, Some(Mode::Cool));
        assert_eq!(ctx.hp.settings().temperature, Some(22.0));
        assert_eq!(ctx.holding_register(HOLDING_MODE, now), Ok(MODE_TABLE.index_of(Mode::Cool).unwrap()));
        assert_eq!(ctx.holding_register(HOLDING_TEMPERATURE, now), Ok(220));
    }

    #[tokio::test(start_paused = true)]
    async fn test_form_before_first_sync_keeps_set_point() {
        let (mut bridge, handle) = bridge(None, true);
        bridge.context_mut().hp.fail_next = 1;
        assert_eq!(bridge.context().holding_register(HOLDING_TEMPERATURE, Instant::now()), Ok(INVALID_REGISTER));

        let form: FormFields = [("MODE".to_string(), "COOL".to_string())].into_iter().collect();
        call(&mut bridge, async move { handle.page(form).await }).await.unwrap();

        // still nothing known, the staged mode goes out on the first update
        assert_eq!(bridge.context().holding_register(HOLDING_TEMPERATURE, Instant::now()), Ok(INVALID_REGISTER));

        steps(&mut bridge, 15, STEP).await;

        let now = Instant::now();
        let ctx = bridge.context();
        assert!(ctx.device_link.is_connected());
        assert_eq!(ctx.hp.settings().mode, Some(Mode::Cool));
        assert_eq!(ctx.hp.settings().temperature, Some(21.0));
        assert_eq!(ctx.holding_register(HOLDING_TEMPERATURE, now), Ok(210));
    }

    #[tokio::test(start_paused = true)]
    async fn test_holding_register_requests() {
        let (mut bridge, handle) = bridge(None, true);
        steps(&mut bridge, 3, STEP).await;

        let h = handle.clone();
        let values = call(&mut bridge, async move { h.read_holding(0, HOLDING_LEN).await }).await.unwrap().unwrap();
        assert_eq!(values.len(), HOLDING_LEN as usize);
        assert_eq!(values[HOLDING_POWER as usize], 0);
        assert_eq!(values[HOLDING_CONNECTED as usize], 1);

        let h = handle.clone();
        assert_eq!(call(&mut bridge, async move { h.read_holding(11, 2).await }).await.unwrap(), Err(RejectedRead(11)));

        for (address, values, expected) in [
            (9, vec![5], RejectedWrite::ReadOnly),
            (1, vec![5], RejectedWrite::ReadOnly),
            (11, vec![5], RejectedWrite::ReadOnly),
            (12, vec![5], RejectedWrite::UnknownAddress),
            (0, vec![1, 5], RejectedWrite::ReadOnly),
        ] {
            let h = handle.clone();
            let result = call(&mut bridge, async move { h.write_holding(address, values).await }).await.unwrap();
            assert_eq!(result, Err(expected), "write to {address}");
        }

        // rejected writes leave the demand untouched
        assert_eq!(bridge.context().reconciler.last_read_at(), None);
        assert_eq!(bridge.context().hp.power_writes, 0);

        let h = handle.clone();
        assert_eq!(call(&mut bridge, async move { h.write_holding(0, vec![1]).await }).await.unwrap(), Ok(()));
        steps(&mut bridge, 2, STEP).await;

        assert_eq!(bridge.context().hp.settings().power, Some(Power::On));
    }

    #[tokio::test(start_paused = true)]
    async fn test_coil_requests_restart() {
        let (mut bridge, handle) = bridge(None, true);

        let h = handle.clone();
        assert_eq!(call(&mut bridge, async move { h.write_coils(COIL_RESET, vec![false]).await }).await.unwrap(), Ok(()));
        assert_eq!(call(&mut bridge, async move { handle.read_coils(0, 3).await }).await.unwrap(), Err(RejectedRead(0)));

        let (mut bridge, handle) = self::bridge(None, true);
        let client = tokio::spawn(async move { handle.write_coils(COIL_REBOOT, vec![true]).await });

        let restart = loop {
            if let Some(restart) = bridge.iterate(Instant::now()).await {
                break restart;
            }
            advance(STEP).await;
        };

        assert_eq!(restart, Restart::Requested { coil: COIL_REBOOT });
        assert_eq!(client.await.unwrap().unwrap(), Ok(()));
    }

    #[tokio::test(start_paused = true)]
    async fn test_uplink_loss_shuts_down_and_restarts() {
        let (mut bridge, _handle) = bridge(Some(MockPeer::new(1)), false);

        let hp = &mut bridge.context_mut().hp;
        hp.connect().await.unwrap();
        hp.set_power(Power::On);
        hp.update().await.unwrap();

        let started = Instant::now();
        let restart = bridge.run().await;

        match restart {
            Restart::UplinkLost { down_for } => assert!(down_for >= Duration::from_secs(20)),
            other => panic!("unexpected restart {other:?}"),
        }
        assert!(Instant::now() - started < Duration::from_secs(21));

        // the peer is never contacted without an uplink
        let ctx = bridge.context();
        assert_eq!(ctx.peer.as_ref().unwrap().reads, 0);
        assert_eq!(ctx.hp.settings().power, Some(Power::Off));
    }

    #[tokio::test(start_paused = true)]
    async fn test_uplink_recovery_resets_window() {
        let (mut bridge, _handle) = bridge(None, false);

        steps(&mut bridge, 15, Duration::from_secs(1)).await;
        bridge.context_mut().uplink.up = true;
        steps(&mut bridge, 2, Duration::from_secs(1)).await;
        bridge.context_mut().uplink.up = false;

        // a fresh 20s window starts at the next failed probe
        steps(&mut bridge, 15, Duration::from_secs(1)).await;
        assert!(!bridge.context().uplink_link.is_connected());
    }
}
