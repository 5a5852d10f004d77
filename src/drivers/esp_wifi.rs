//! ESP-IDF WiFi driver.
//!
//! `EspWifi` owns the netifs and the driver configuration; association,
//! addressing and scan completions come back through a raw system event
//! handler that forwards them to the transport's [`WifiEventSink`].
//! Datagrams go over a plain std `UdpSocket` on the lwIP stack.
//!
//! ```text
//! ┌──────────────┐  WIFI_EVENT / IP_EVENT  ┌───────────────┐  post()  ┌────────────────┐
//! │ sys event    │────────────────────────▶│ event_handler │────────▶│ WifiEventSink  │
//! │ task         │                         │ (static sink) │         │ → wifi worker  │
//! └──────────────┘                         └───────────────┘         └────────────────┘
//! ```

use core::cell::RefCell;
use core::ffi::c_void;
use std::io::ErrorKind;
use std::net::UdpSocket;

use critical_section::Mutex;
use esp_idf_svc::eventloop::EspSystemEventLoop;
use esp_idf_svc::hal::modem::Modem;
use esp_idf_svc::nvs::EspDefaultNvsPartition;
use esp_idf_svc::sys::*;
use esp_idf_svc::wifi::{
    AccessPointConfiguration, AccessPointInfo, AuthMethod, ClientConfiguration, Configuration,
    EspWifi as Driver, ScanConfig,
};
use log::{info, warn};

use crate::config::{IpMode, WifiApConfig, WifiStationConfig};
use crate::wifi::driver::{
    MAX_SCAN_RESULTS, ScanResult, ScanResults, WifiDriver, WifiDriverError, WifiEvent,
    WifiEventSink, WifiMode, WifiSecurity,
};

/// Destination for system events.  One WiFi driver per chip.
static SINK: Mutex<RefCell<Option<WifiEventSink>>> = Mutex::new(RefCell::new(None));

fn esp_err(e: EspError) -> WifiDriverError {
    WifiDriverError::Esp(e.code())
}

fn check(rc: esp_err_t) -> Result<(), WifiDriverError> {
    if rc == ESP_OK as esp_err_t {
        Ok(())
    } else {
        Err(WifiDriverError::Esp(rc))
    }
}

fn post(event: WifiEvent) {
    let sink = critical_section::with(|cs| SINK.borrow_ref(cs).clone());
    if let Some(sink) = sink {
        sink.post(event);
    }
}

fn current_ap_record() -> Option<wifi_ap_record_t> {
    let mut record = wifi_ap_record_t::default();
    // SAFETY: `record` is a valid out-pointer for the duration of the call.
    let rc = unsafe { esp_wifi_sta_get_ap_info(&mut record) };
    (rc == ESP_OK as esp_err_t).then_some(record)
}

unsafe extern "C" fn event_handler(
    _arg: *mut c_void,
    base: esp_event_base_t,
    id: i32,
    data: *mut c_void,
) {
    // SAFETY: the event bases are link-time constants; `data` matches the
    // payload type documented for each event id.
    unsafe {
        if base == WIFI_EVENT {
            match id as u32 {
                wifi_event_t_WIFI_EVENT_STA_CONNECTED => {
                    let info = &*(data as *const wifi_event_sta_connected_t);
                    let rssi = current_ap_record().map_or(0, |r| r.rssi);
                    post(WifiEvent::StaConnected { rssi, channel: info.channel });
                }
                wifi_event_t_WIFI_EVENT_STA_DISCONNECTED => {
                    let info = &*(data as *const wifi_event_sta_disconnected_t);
                    post(WifiEvent::StaDisconnected { reason: info.reason as u16 });
                }
                wifi_event_t_WIFI_EVENT_SCAN_DONE => post(WifiEvent::ScanDone),
                wifi_event_t_WIFI_EVENT_AP_START => post(WifiEvent::ApStarted),
                wifi_event_t_WIFI_EVENT_AP_STOP => post(WifiEvent::ApStopped),
                wifi_event_t_WIFI_EVENT_AP_STACONNECTED => post(WifiEvent::ApClientJoined),
                wifi_event_t_WIFI_EVENT_AP_STADISCONNECTED => post(WifiEvent::ApClientLeft),
                _ => {}
            }
        } else if base == IP_EVENT && id as u32 == ip_event_t_IP_EVENT_STA_GOT_IP {
            let info = &*(data as *const ip_event_got_ip_t);
            post(WifiEvent::GotIp(info.ip_info.ip.addr.to_le_bytes()));
        }
    }
}

fn auth_method(password: &str) -> AuthMethod {
    if password.is_empty() {
        AuthMethod::None
    } else {
        AuthMethod::WPA2Personal
    }
}

fn security(method: Option<AuthMethod>) -> WifiSecurity {
    match method {
        Some(AuthMethod::None) => WifiSecurity::Open,
        Some(AuthMethod::WEP) => WifiSecurity::Wep,
        Some(AuthMethod::WPA) => WifiSecurity::WpaPsk,
        Some(AuthMethod::WPA2Personal) => WifiSecurity::Wpa2Psk,
        Some(AuthMethod::WPAWPA2Personal) => WifiSecurity::WpaWpa2Psk,
        Some(AuthMethod::WPA3Personal) => WifiSecurity::Wpa3Psk,
        Some(AuthMethod::WPA2WPA3Personal) => WifiSecurity::Wpa2Wpa3Psk,
        Some(AuthMethod::WPA2Enterprise) => WifiSecurity::Wpa2Enterprise,
        _ => WifiSecurity::Unknown,
    }
}

fn to_results(records: impl IntoIterator<Item = AccessPointInfo>) -> ScanResults {
    let mut out = ScanResults::new();
    for ap in records.into_iter().take(MAX_SCAN_RESULTS) {
        let hidden = ap.ssid.is_empty();
        // Capacity is bounded by `take` above.
        let _ = out.push(ScanResult {
            ssid: ap.ssid.as_str().try_into().unwrap_or_default(),
            rssi: ap.signal_strength,
            channel: ap.channel,
            security: security(ap.auth_method),
            hidden,
        });
    }
    out
}

pub struct EspWifi {
    driver: Driver<'static>,
    mode: WifiMode,
    station: Option<ClientConfiguration>,
    ap: Option<AccessPointConfiguration>,
    socket: Option<UdpSocket>,
    ip: Option<[u8; 4]>,
    ap_clients: u8,
    handlers_registered: bool,
}

impl EspWifi {
    pub fn new(
        modem: Modem,
        sysloop: EspSystemEventLoop,
        nvs: Option<EspDefaultNvsPartition>,
    ) -> Result<Self, WifiDriverError> {
        let driver = Driver::new(modem, sysloop, nvs).map_err(esp_err)?;
        Ok(Self {
            driver,
            mode: WifiMode::Off,
            station: None,
            ap: None,
            socket: None,
            ip: None,
            ap_clients: 0,
            handlers_registered: false,
        })
    }

    fn apply(&mut self) -> Result<(), WifiDriverError> {
        let config = match (self.mode, self.station.clone(), self.ap.clone()) {
            (WifiMode::Off, _, _) => {
                if self.driver.is_started().unwrap_or(false) {
                    self.driver.stop().map_err(esp_err)?;
                }
                return Ok(());
            }
            (WifiMode::Station, sta, _) => Configuration::Client(sta.unwrap_or_default()),
            (WifiMode::AccessPoint, _, ap) => Configuration::AccessPoint(ap.unwrap_or_default()),
            (WifiMode::StationAndAccessPoint, sta, ap) => {
                Configuration::Mixed(sta.unwrap_or_default(), ap.unwrap_or_default())
            }
        };
        self.driver.set_configuration(&config).map_err(esp_err)?;
        if !self.driver.is_started().unwrap_or(false) {
            self.driver.start().map_err(esp_err)?;
        }
        Ok(())
    }

    fn apply_static_ip(&mut self, mode: &IpMode) -> Result<(), WifiDriverError> {
        let IpMode::Static(addr) = mode else {
            return Ok(());
        };
        let netif = self.driver.sta_netif().handle();
        let info = esp_netif_ip_info_t {
            ip: esp_ip4_addr_t { addr: u32::from_le_bytes(addr.ip) },
            netmask: esp_ip4_addr_t { addr: u32::from_le_bytes(addr.subnet) },
            gw: esp_ip4_addr_t { addr: u32::from_le_bytes(addr.gateway) },
        };
        // SAFETY: `netif` is owned by the driver and outlives both calls.
        unsafe {
            let rc = esp_netif_dhcpc_stop(netif);
            if rc != ESP_OK as esp_err_t && rc != ESP_ERR_ESP_NETIF_DHCP_ALREADY_STOPPED as esp_err_t {
                return Err(WifiDriverError::Esp(rc));
            }
            check(esp_netif_set_ip_info(netif, &info))?;
        }
        self.ip = Some(addr.ip);
        post(WifiEvent::GotIp(addr.ip));
        Ok(())
    }
}

impl WifiDriver for EspWifi {
    fn attach_events(&mut self, sink: WifiEventSink) -> Result<(), WifiDriverError> {
        critical_section::with(|cs| SINK.borrow_ref_mut(cs).replace(sink));
        if self.handlers_registered {
            return Ok(());
        }
        // SAFETY: the handler is a plain fn that only touches the static sink.
        unsafe {
            check(esp_event_handler_register(
                WIFI_EVENT,
                ESP_EVENT_ANY_ID,
                Some(event_handler),
                core::ptr::null_mut(),
            ))?;
            check(esp_event_handler_register(
                IP_EVENT,
                ip_event_t_IP_EVENT_STA_GOT_IP as i32,
                Some(event_handler),
                core::ptr::null_mut(),
            ))?;
        }
        self.handlers_registered = true;
        Ok(())
    }

    fn set_mode(&mut self, mode: WifiMode) -> Result<(), WifiDriverError> {
        self.mode = mode;
        self.apply()
    }

    fn begin_connect(&mut self, config: &WifiStationConfig) -> Result<(), WifiDriverError> {
        self.station = Some(ClientConfiguration {
            ssid: config.ssid.clone(),
            password: config.password.clone(),
            auth_method: auth_method(&config.password),
            ..Default::default()
        });
        if !self.mode.has_station() {
            self.mode = WifiMode::from_parts(true, self.mode.has_ap());
        }
        self.apply()?;
        self.apply_static_ip(&config.ip)?;
        info!("WiFi(esp): associating with '{}'", config.ssid);
        self.driver.connect().map_err(esp_err)
    }

    fn disconnect(&mut self) -> Result<(), WifiDriverError> {
        self.ip = None;
        self.driver.disconnect().map_err(esp_err)
    }

    fn reconnect(&mut self) -> Result<(), WifiDriverError> {
        if self.station.is_none() {
            return Err(WifiDriverError::NotStarted);
        }
        self.driver.connect().map_err(esp_err)
    }

    fn start_ap(&mut self, config: &WifiApConfig) -> Result<(), WifiDriverError> {
        self.ap = Some(AccessPointConfiguration {
            ssid: config.ssid.clone(),
            password: config.password.clone(),
            auth_method: auth_method(&config.password),
            channel: config.channel,
            ssid_hidden: config.hidden,
            max_connections: u16::from(config.max_connections),
            ..Default::default()
        });
        self.mode = WifiMode::from_parts(self.mode.has_station(), true);
        self.apply()
    }

    fn stop_ap(&mut self) -> Result<(), WifiDriverError> {
        self.ap = None;
        self.ap_clients = 0;
        self.mode = WifiMode::from_parts(self.mode.has_station(), false);
        self.apply()?;
        post(WifiEvent::ApStopped);
        Ok(())
    }

    fn start_scan(&mut self) -> Result<(), WifiDriverError> {
        if !self.mode.has_station() {
            return Err(WifiDriverError::NotStarted);
        }
        self.driver.start_scan(&ScanConfig::default(), false).map_err(esp_err)
    }

    fn scan_results(&mut self) -> Result<ScanResults, WifiDriverError> {
        self.driver.get_scan_result().map(to_results).map_err(esp_err)
    }

    fn scan_blocking(&mut self) -> Result<ScanResults, WifiDriverError> {
        if !self.mode.has_station() {
            return Err(WifiDriverError::NotStarted);
        }
        self.driver.scan().map(to_results).map_err(esp_err)
    }

    fn bind_datagram(&mut self, local_port: u16) -> Result<(), WifiDriverError> {
        let socket = UdpSocket::bind(("0.0.0.0", local_port)).map_err(|_| WifiDriverError::Io)?;
        socket.set_nonblocking(true).map_err(|_| WifiDriverError::Io)?;
        self.socket = Some(socket);
        Ok(())
    }

    fn close_datagram(&mut self) {
        self.socket = None;
    }

    fn send_datagram(&mut self, host: &str, port: u16, data: &[u8]) -> Result<(), WifiDriverError> {
        let socket = self.socket.as_ref().ok_or(WifiDriverError::NotStarted)?;
        match socket.send_to(data, (host, port)) {
            Ok(n) if n == data.len() => Ok(()),
            Ok(n) => {
                warn!("WiFi(esp): short datagram write {n}/{}", data.len());
                Err(WifiDriverError::Io)
            }
            Err(_) => Err(WifiDriverError::Io),
        }
    }

    fn recv_datagram(&mut self, buf: &mut [u8]) -> Result<Option<usize>, WifiDriverError> {
        let Some(socket) = self.socket.as_ref() else {
            return Ok(None);
        };
        match socket.recv_from(buf) {
            Ok((n, _)) => Ok(Some(n)),
            Err(e) if e.kind() == ErrorKind::WouldBlock => Ok(None),
            Err(_) => Err(WifiDriverError::Io),
        }
    }

    fn ip_address(&self) -> Option<[u8; 4]> {
        if let Some(ip) = self.ip {
            return Some(ip);
        }
        let info = self.driver.sta_netif().get_ip_info().ok()?;
        let octets = info.ip.octets();
        (octets != [0; 4]).then_some(octets)
    }

    fn mac_address(&self) -> [u8; 6] {
        self.driver.sta_netif().get_mac().unwrap_or([0; 6])
    }

    fn rssi(&self) -> Option<i8> {
        current_ap_record().map(|r| r.rssi)
    }

    fn channel(&self) -> Option<u8> {
        current_ap_record().map(|r| r.primary)
    }

    fn ap_client_count(&self) -> u8 {
        if !self.mode.has_ap() {
            return 0;
        }
        let mut list = wifi_sta_list_t::default();
        // SAFETY: `list` is a valid out-pointer for the duration of the call.
        let rc = unsafe { esp_wifi_ap_get_sta_list(&mut list) };
        if rc == ESP_OK as esp_err_t {
            list.num as u8
        } else {
            self.ap_clients
        }
    }

    fn set_power_save(&mut self, enabled: bool) -> Result<(), WifiDriverError> {
        let mode = if enabled {
            wifi_ps_type_t_WIFI_PS_MIN_MODEM
        } else {
            wifi_ps_type_t_WIFI_PS_NONE
        };
        // SAFETY: plain configuration call on a started driver.
        check(unsafe { esp_wifi_set_ps(mode) })
    }

    fn set_tx_power(&mut self, dbm: i8) -> Result<(), WifiDriverError> {
        // Driver unit is 0.25 dBm, accepted range 8..=84.
        let quarter_dbm = (i16::from(dbm) * 4).clamp(8, 84) as i8;
        // SAFETY: plain configuration call on a started driver.
        check(unsafe { esp_wifi_set_max_tx_power(quarter_dbm) })
    }
}

impl Drop for EspWifi {
    fn drop(&mut self) {
        critical_section::with(|cs| SINK.borrow_ref_mut(cs).take());
        if self.handlers_registered {
            // SAFETY: unregisters the handler registered in `attach_events`.
            unsafe {
                esp_event_handler_unregister(WIFI_EVENT, ESP_EVENT_ANY_ID, Some(event_handler));
                esp_event_handler_unregister(
                    IP_EVENT,
                    ip_event_t_IP_EVENT_STA_GOT_IP as i32,
                    Some(event_handler),
                );
            }
        }
    }
}
