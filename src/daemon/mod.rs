// Copyright 2018-2021 System76 <info@system76.com>
//
// SPDX-License-Identifier: GPL-3.0-only

use std::{
    collections::{HashMap, VecDeque},
    path::Path,
    sync::{atomic::Ordering, Arc},
    time::Duration,
};

use tokio::sync::{mpsc, oneshot};
use typec_altmode_zbus::PortStatus;
use zbus::{fdo, Connection, ConnectionBuilder, MessageHeader, SignalContext};
use zbus_polkit::policykit1::{AuthorityProxy, CheckAuthorizationFlags, Subject};

use crate::{
    board::{ChipsetState, Platform, SimulatedBoard},
    config::Config,
    dfp::Setup,
    errors::{DaemonError, Nak},
    host::{ChannelHost, HostEvent},
    manager::PortManager,
    time::MonotonicClock,
    Port, DBUS_IFACE, DBUS_NAME, DBUS_PATH,
};

mod interrupt;
use self::interrupt::CONTINUE;

const MF_ALLOW_POLICY: &str = "com.system76.typecaltmode.set-mf-allow";
const SEND_VDM_POLICY: &str = "com.system76.typecaltmode.send-vdm";
const PORT_STATE_POLICY: &str = "com.system76.typecaltmode.set-port-state";

/// Work handed from the D-Bus interface to the task owning the ports.
enum Request {
    PortCount(oneshot::Sender<u32>),
    PortStatus(u32, oneshot::Sender<Option<PortStatus>>),
    SetMfAllow(u32, bool, oneshot::Sender<Result<(), Nak>>),
    SendVdm(u32, Vec<u32>, oneshot::Sender<Vec<u32>>),
    PollVdm(u32, oneshot::Sender<Vec<u32>>),
    SetConnected(u32, bool, oneshot::Sender<Result<(), Nak>>),
    SetChipset(ChipsetState, oneshot::Sender<usize>),
}

struct TypecAltMode {
    requests:  mpsc::Sender<Request>,
    authorize: bool,
}

impl TypecAltMode {
    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Request) -> fdo::Result<T> {
        let stopped = || fdo::Error::Failed("port event loop has stopped".into());
        let (tx, rx) = oneshot::channel();
        self.requests.send(build(tx)).await.map_err(|_| stopped())?;
        rx.await.map_err(|_| stopped())
    }

    async fn check_authorization(
        &self,
        connection: &Connection,
        header: &MessageHeader<'_>,
        action_id: &str,
    ) -> fdo::Result<()> {
        if !self.authorize {
            return Ok(());
        }

        let authority = AuthorityProxy::new(connection).await?;
        let subject = Subject::new_for_message_header(header).map_err(|why| fdo::Error::Failed(why.to_string()))?;
        let result = authority
            .check_authorization(
                &subject,
                action_id,
                &HashMap::new(),
                CheckAuthorizationFlags::AllowUserInteraction.into(),
                "",
            )
            .await?;

        if result.is_authorized {
            Ok(())
        } else {
            Err(fdo::Error::AccessDenied("Operation not permitted by Polkit".into()))
        }
    }
}

#[zbus::dbus_interface(name = "com.system76.TypecAltMode")]
impl TypecAltMode {
    async fn get_port_count(&self) -> fdo::Result<u32> { self.request(Request::PortCount).await }

    async fn get_port_status(&self, port: u32) -> fdo::Result<PortStatus> {
        self.request(|tx| Request::PortStatus(port, tx))
            .await?
            .ok_or_else(|| fdo::Error::InvalidArgs(format!("port {} does not exist", port)))
    }

    async fn set_mf_allow(
        &self,
        #[zbus(header)] header: MessageHeader<'_>,
        #[zbus(connection)] connection: &Connection,
        port: u32,
        allow: bool,
    ) -> fdo::Result<()> {
        self.check_authorization(connection, &header, MF_ALLOW_POLICY).await?;
        self.request(|tx| Request::SetMfAllow(port, allow, tx))
            .await?
            .map_err(|why| fdo::Error::InvalidArgs(why.to_string()))
    }

    async fn send_vdm(
        &self,
        #[zbus(header)] header: MessageHeader<'_>,
        #[zbus(connection)] connection: &Connection,
        port: u32,
        vdos: Vec<u32>,
    ) -> fdo::Result<Vec<u32>> {
        self.check_authorization(connection, &header, SEND_VDM_POLICY).await?;
        self.request(|tx| Request::SendVdm(port, vdos, tx)).await
    }

    /// Next message the port wants to send to its partner, or nothing.
    async fn poll_vdm(
        &self,
        #[zbus(header)] header: MessageHeader<'_>,
        #[zbus(connection)] connection: &Connection,
        port: u32,
    ) -> fdo::Result<Vec<u32>> {
        self.check_authorization(connection, &header, SEND_VDM_POLICY).await?;
        self.request(|tx| Request::PollVdm(port, tx)).await
    }

    async fn set_connected(
        &self,
        #[zbus(header)] header: MessageHeader<'_>,
        #[zbus(connection)] connection: &Connection,
        port: u32,
        connected: bool,
    ) -> fdo::Result<()> {
        self.check_authorization(connection, &header, PORT_STATE_POLICY).await?;
        self.request(|tx| Request::SetConnected(port, connected, tx))
            .await?
            .map_err(|why| fdo::Error::InvalidArgs(why.to_string()))
    }

    /// Returns how many ports were asked to leave DisplayPort mode.
    async fn set_chipset_state(
        &self,
        #[zbus(header)] header: MessageHeader<'_>,
        #[zbus(connection)] connection: &Connection,
        state: &str,
    ) -> fdo::Result<u32> {
        self.check_authorization(connection, &header, PORT_STATE_POLICY).await?;
        let state = ChipsetState::parse(state)
            .ok_or_else(|| fdo::Error::InvalidArgs(format!("unknown chipset state {}", state)))?;
        self.request(|tx| Request::SetChipset(state, tx)).await.map(|exits| exits as u32)
    }

    #[dbus_interface(signal)]
    async fn hot_plug_detect(ctxt: &SignalContext<'_>, port: u32, level: bool) -> zbus::Result<()>;

    #[dbus_interface(signal)]
    async fn power_info_change(ctxt: &SignalContext<'_>, port: u32) -> zbus::Result<()>;

    #[dbus_interface(signal)]
    async fn dp_alt_mode_entry(ctxt: &SignalContext<'_>, port: u32) -> zbus::Result<()>;

    #[dbus_interface(signal)]
    async fn update_device(ctxt: &SignalContext<'_>, port: u32) -> zbus::Result<()>;
}

/// Port state owned by the event loop, with messages waiting to be polled.
struct PortLoop {
    manager: PortManager,
    board:   Arc<SimulatedBoard>,
    outbox:  Vec<VecDeque<Vec<u32>>>,
}

impl PortLoop {
    fn new(manager: PortManager, board: Arc<SimulatedBoard>) -> Self {
        let outbox = (0..manager.port_count()).map(|_| VecDeque::new()).collect();
        Self { manager, board, outbox }
    }

    fn poll(&mut self, port: Port) -> Vec<u32> {
        if let Some(vdos) = self.outbox.get_mut(port).and_then(VecDeque::pop_front) {
            return vdos;
        }

        match self.manager.poll(port) {
            Setup::Send(vdos) => vdos,
            _ => Vec::new(),
        }
    }

    async fn set_connected(&mut self, port: Port, connected: bool) -> Result<(), Nak> {
        let outbox = self.outbox.get_mut(port).ok_or(Nak::InvalidPort(port))?;
        outbox.clear();
        if connected {
            self.manager.connect(port)
        } else {
            self.manager.disconnect(port).await;
            Ok(())
        }
    }

    fn set_chipset(&mut self, state: ChipsetState) -> usize {
        self.board.set_chipset(state);
        let exits = self.manager.chipset_changed(state);
        let count = exits.len();
        for (port, setup) in exits {
            if let (Setup::Send(vdos), Some(outbox)) = (setup, self.outbox.get_mut(port)) {
                outbox.push_back(vdos);
            }
        }
        log::info!("Chipset state {:?}, {} ports leaving DisplayPort mode", state, count);
        count
    }

    async fn handle(&mut self, request: Request) {
        // A dropped receiver means the caller went away; nothing to report to.
        match request {
            Request::PortCount(tx) => {
                let _ = tx.send(self.manager.port_count() as u32);
            }
            Request::PortStatus(port, tx) => {
                let _ = tx.send(self.manager.status(port as usize));
            }
            Request::SetMfAllow(port, allow, tx) => {
                let _ = tx.send(self.manager.set_mf_allow(port as usize, allow));
            }
            Request::SendVdm(port, vdos, tx) => {
                log::info!("DBUS Received SendVdm(C{}, {:08x?})", port, vdos);
                let reply = self.manager.handle_vdm(port as usize, &vdos).await;
                let _ = tx.send(reply.into_vdos());
            }
            Request::PollVdm(port, tx) => {
                let _ = tx.send(self.poll(port as usize));
            }
            Request::SetConnected(port, connected, tx) => {
                log::info!("DBUS Received SetConnected(C{}, {})", port, connected);
                let _ = tx.send(self.set_connected(port as usize, connected).await);
            }
            Request::SetChipset(state, tx) => {
                let _ = tx.send(self.set_chipset(state));
            }
        }
    }
}

async fn emit(ctxt: &SignalContext<'_>, event: HostEvent) {
    let result = match event {
        HostEvent::HotPlugDetect { port, level } => {
            log::info!("HotPlugDetect C{} {}", port, if level { "high" } else { "low" });
            TypecAltMode::hot_plug_detect(ctxt, port as u32, level).await
        }
        HostEvent::PowerChange(port) => TypecAltMode::power_info_change(ctxt, port as u32).await,
        HostEvent::DpAltModeEntry(port) => TypecAltMode::dp_alt_mode_entry(ctxt, port as u32).await,
        HostEvent::UpdateDevice(port) => TypecAltMode::update_device(ctxt, port as u32).await,
    };

    if let Err(why) = result {
        log::error!("failed to send {:?} signal: {}", event, why);
    }
}

#[tokio::main(flavor = "current_thread")]
pub async fn daemon(config: Option<&Path>, session: bool) -> Result<(), DaemonError> {
    if !session && unsafe { libc::geteuid() } != 0 {
        return Err(DaemonError::NotRoot);
    }

    if let Err(why) = interrupt::handle() {
        log::warn!("failed to install signal handlers: {}", why);
    }

    let config = Config::load(config)?;
    log::info!("Starting daemon with {} ports", config.ports);

    let (host_tx, mut host_rx) = mpsc::unbounded_channel();
    let clock = Arc::new(MonotonicClock::new());
    let board = Arc::new(SimulatedBoard::new(config.ports, config.shared_ports(), clock.clone()).without_trace());
    board.set_chipset(config.chipset_state().unwrap_or(ChipsetState::ON));
    let plat = Platform { board: board.clone(), clock, host: Arc::new(ChannelHost::new(host_tx)) };
    let mut ports = PortLoop::new(PortManager::new(&config, plat), board);

    let (requests, mut request_rx) = mpsc::channel(16);
    let iface = TypecAltMode { requests, authorize: !session };

    log::info!("Registering dbus name {}", DBUS_NAME);
    log::info!("Adding dbus path {} with interface {}", DBUS_PATH, DBUS_IFACE);
    let builder = if session { ConnectionBuilder::session()? } else { ConnectionBuilder::system()? };
    let connection = builder.name(DBUS_NAME)?.serve_at(DBUS_PATH, iface)?.build().await?;
    let iface_ref = connection.object_server().interface::<_, TypecAltMode>(DBUS_PATH).await?;
    let ctxt = iface_ref.signal_context();

    while CONTINUE.load(Ordering::SeqCst) {
        tokio::select! {
            request = request_rx.recv() => match request {
                Some(request) => ports.handle(request).await,
                None => break,
            },
            Some(event) = host_rx.recv() => emit(ctxt, event).await,
            // Wake up now and then to notice a caught signal.
            () = tokio::time::sleep(Duration::from_secs(1)) => (),
        }
    }

    log::info!("Stopping daemon");
    Ok(())
}
