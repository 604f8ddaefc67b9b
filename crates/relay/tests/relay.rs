//! Integrationstests: Relay ueber echte WebSocket-Verbindungen

use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::time::Duration;
use tandem_relay::{LaufenderRelay, RelayConfig, RelayServer};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

const WARTEZEIT: Duration = Duration::from_secs(2);

async fn relay_starten(config: RelayConfig) -> LaufenderRelay {
    RelayServer::neu(config)
        .starten("127.0.0.1:0".parse().unwrap())
        .await
        .expect("Relay startet")
}

fn topic(n: u8) -> String {
    format!("{n:02x}").repeat(32)
}

struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
    naechste_id: u64,
}

impl TestClient {
    async fn verbinden(relay: &LaufenderRelay) -> Self {
        let (ws, _) = connect_async(relay.ws_url()).await.expect("WebSocket verbunden");
        Self { ws, naechste_id: 1 }
    }

    async fn roh_senden(&mut self, text: &str) {
        self.ws.send(Message::text(text)).await.unwrap();
    }

    async fn anfrage(&mut self, method: &str, params: Value) -> u64 {
        let id = self.naechste_id;
        self.naechste_id += 1;
        let text = json!({"id": id, "jsonrpc": "2.0", "method": method, "params": params});
        self.roh_senden(&text.to_string()).await;
        id
    }

    /// Naechster Text-Frame als JSON; Pings werden uebersprungen
    async fn empfangen(&mut self) -> Value {
        tokio::time::timeout(WARTEZEIT, async {
            loop {
                match self.ws.next().await {
                    Some(Ok(Message::Text(text))) => return serde_json::from_str(&text).unwrap(),
                    Some(Ok(_)) => continue,
                    andere => panic!("Verbindung unerwartet beendet: {andere:?}"),
                }
            }
        })
        .await
        .expect("Nachricht innerhalb der Wartezeit")
    }

    /// Prueft, dass in `dauer` kein Text-Frame ankommt
    async fn nichts_empfangen(&mut self, dauer: Duration) {
        let ergebnis = tokio::time::timeout(dauer, async {
            loop {
                match self.ws.next().await {
                    Some(Ok(Message::Text(text))) => return text.to_string(),
                    Some(Ok(_)) => continue,
                    _ => std::future::pending::<()>().await,
                }
            }
        })
        .await;
        if let Ok(text) = ergebnis {
            panic!("Keine Nachricht erwartet, erhalten: {text}");
        }
    }

    async fn subscribe(&mut self, topic: &str) -> String {
        let id = self.anfrage("subscribe", json!({"topic": topic})).await;
        let antwort = self.empfangen().await;
        assert_eq!(antwort["id"], id);
        antwort["result"].as_str().expect("Subscription-Id").to_string()
    }

    async fn publish(&mut self, topic: &str, message: &str) {
        let id = self
            .anfrage("publish", json!({"topic": topic, "message": message}))
            .await;
        let antwort = self.empfangen().await;
        assert_eq!(antwort["id"], id);
        assert_eq!(antwort["result"], true);
    }
}

#[tokio::test]
async fn backlog_wird_genau_einmal_ausgeliefert() {
    let relay = relay_starten(RelayConfig::default()).await;
    let t = topic(1);

    let mut a = TestClient::verbinden(&relay).await;
    a.publish(&t, "hello").await;
    assert_eq!(relay.state().registry.backlog().anzahl(&t).await, 1);

    let mut b = TestClient::verbinden(&relay).await;
    let sub_id = b.subscribe(&t).await;
    let push = b.empfangen().await;
    assert_eq!(push["method"], "subscription");
    assert_eq!(push["params"]["id"], sub_id.as_str());
    assert_eq!(push["params"]["data"]["topic"], t.as_str());
    assert_eq!(push["params"]["data"]["message"], "hello");
    assert_eq!(relay.state().registry.backlog().anzahl(&t).await, 0);

    let mut c = TestClient::verbinden(&relay).await;
    c.subscribe(&t).await;
    c.nichts_empfangen(Duration::from_millis(200)).await;
    b.nichts_empfangen(Duration::from_millis(100)).await;

    relay.beenden().await.unwrap();
}

#[tokio::test]
async fn fan_out_an_alle_ausser_absender() {
    let relay = relay_starten(RelayConfig::default()).await;
    let t = topic(2);

    let mut a = TestClient::verbinden(&relay).await;
    let mut b = TestClient::verbinden(&relay).await;
    let mut c = TestClient::verbinden(&relay).await;
    a.subscribe(&t).await;
    b.subscribe(&t).await;
    c.subscribe(&t).await;

    a.publish(&t, "an alle").await;
    for client in [&mut b, &mut c] {
        let push = client.empfangen().await;
        assert_eq!(push["params"]["data"]["message"], "an alle");
        client.nichts_empfangen(Duration::from_millis(100)).await;
    }
    a.nichts_empfangen(Duration::from_millis(100)).await;
    assert_eq!(relay.state().registry.backlog().anzahl(&t).await, 0);

    relay.beenden().await.unwrap();
}

#[tokio::test]
async fn reihenfolge_bleibt_erhalten() {
    let relay = relay_starten(RelayConfig::default()).await;
    let t = topic(3);

    let mut a = TestClient::verbinden(&relay).await;
    let mut b = TestClient::verbinden(&relay).await;
    b.subscribe(&t).await;

    for i in 0..20 {
        a.publish(&t, &format!("n{i}")).await;
    }
    for i in 0..20 {
        let push = b.empfangen().await;
        assert_eq!(push["params"]["data"]["message"], format!("n{i}"));
    }

    relay.beenden().await.unwrap();
}

#[tokio::test]
async fn unsubscribe_beendet_zustellung() {
    let relay = relay_starten(RelayConfig::default()).await;
    let t = topic(4);

    let mut a = TestClient::verbinden(&relay).await;
    let mut b = TestClient::verbinden(&relay).await;
    let sub_id = b.subscribe(&t).await;

    let id = b.anfrage("unsubscribe", json!({"id": sub_id, "topic": t})).await;
    let antwort = b.empfangen().await;
    assert_eq!(antwort["id"], id);
    assert_eq!(antwort["result"], true);

    a.publish(&t, "weg").await;
    b.nichts_empfangen(Duration::from_millis(200)).await;
    assert_eq!(relay.state().registry.backlog().anzahl(&t).await, 1);

    relay.beenden().await.unwrap();
}

#[tokio::test]
async fn trennung_entfernt_subscriptions() {
    let relay = relay_starten(RelayConfig::default()).await;
    let t = topic(5);

    let mut b = TestClient::verbinden(&relay).await;
    b.subscribe(&t).await;
    assert_eq!(relay.state().registry.abonnenten(&t).await, 1);

    b.ws.close(None).await.unwrap();
    drop(b);

    let registry = relay.state().registry.clone();
    let aufgeraeumt = tokio::time::timeout(WARTEZEIT, async {
        while registry.abonnenten(&t).await > 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await;
    assert!(aufgeraeumt.is_ok());

    relay.beenden().await.unwrap();
}

#[tokio::test]
async fn legacy_pub_sub() {
    let relay = relay_starten(RelayConfig::default()).await;

    let mut l1 = TestClient::verbinden(&relay).await;
    let mut l2 = TestClient::verbinden(&relay).await;
    l1.roh_senden(r#"{"topic":"altes-topic","type":"sub","payload":""}"#)
        .await;

    let registry = relay.state().registry.clone();
    tokio::time::timeout(WARTEZEIT, async {
        while registry.abonnenten("altes-topic").await == 0 {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .unwrap();

    l2.roh_senden(r#"{"topic":"altes-topic","type":"pub","payload":"daten"}"#)
        .await;
    let zustellung = l1.empfangen().await;
    assert_eq!(zustellung["topic"], "altes-topic");
    assert_eq!(zustellung["type"], "pub");
    assert_eq!(zustellung["payload"], "daten");

    l1.roh_senden(r#"{"topic":"altes-topic","type":"ack","payload":""}"#)
        .await;
    l1.nichts_empfangen(Duration::from_millis(100)).await;
    l2.nichts_empfangen(Duration::from_millis(100)).await;

    relay.beenden().await.unwrap();
}

#[tokio::test]
async fn fehlerhafte_nachrichten_bekommen_fehlercodes() {
    let relay = relay_starten(RelayConfig::default()).await;
    let mut c = TestClient::verbinden(&relay).await;

    c.roh_senden("kein json").await;
    assert_eq!(c.empfangen().await["error"]["code"], -32700);

    c.roh_senden(r#"{"hallo":"welt"}"#).await;
    assert_eq!(c.empfangen().await["error"]["code"], -32700);

    c.roh_senden(r#"{"jsonrpc":"2.0","method":"publish"}"#).await;
    assert_eq!(c.empfangen().await["error"]["code"], -32600);

    let id = c.anfrage("iridium_publish", json!({})).await;
    let antwort = c.empfangen().await;
    assert_eq!(antwort["id"], id);
    assert_eq!(antwort["error"]["code"], -32601);

    let id = c.anfrage("subscribe", json!({"topic": "zu-kurz"})).await;
    let antwort = c.empfangen().await;
    assert_eq!(antwort["id"], id);
    assert_eq!(antwort["error"]["code"], -32602);

    relay.beenden().await.unwrap();
}

#[tokio::test]
async fn stummer_client_wird_getrennt() {
    let relay = relay_starten(RelayConfig {
        heartbeat: Duration::from_millis(100),
        ..Default::default()
    })
    .await;
    let registry = relay.state().registry.clone();

    // Liest nie, beantwortet also keine Pings
    let stumm = TestClient::verbinden(&relay).await;
    let mut aktiv = TestClient::verbinden(&relay).await;
    aktiv.nichts_empfangen(Duration::from_millis(600)).await;

    assert_eq!(registry.verbindungen().await, 1);
    drop(stumm);
    relay.beenden().await.unwrap();
}

#[tokio::test]
async fn rest_endpunkte() {
    let relay = relay_starten(RelayConfig::default()).await;
    let basis = format!("http://{}", relay.addr());
    let http = reqwest::Client::new();

    let health = http.get(format!("{basis}/health")).send().await.unwrap();
    assert_eq!(health.status().as_u16(), 204);

    let hello = http.get(format!("{basis}/hello")).send().await.unwrap();
    assert_eq!(hello.status().as_u16(), 200);
    assert!(hello.text().await.unwrap().contains("Tandem Relay v"));

    let ok = http
        .post(format!("{basis}/subscribe"))
        .json(&json!({"topic": topic(6), "webhook": "http://127.0.0.1:9/hook"}))
        .send()
        .await
        .unwrap();
    assert_eq!(ok.status().as_u16(), 200);
    assert_eq!(ok.json::<Value>().await.unwrap()["success"], true);
    assert_eq!(relay.state().webhooks.fuer_topic(&topic(6)).len(), 1);

    let falsch = http
        .post(format!("{basis}/subscribe"))
        .json(&json!({"topic": topic(6)}))
        .send()
        .await
        .unwrap();
    assert_eq!(falsch.status().as_u16(), 400);

    relay.beenden().await.unwrap();
}

#[tokio::test]
async fn ueberlange_ttl_wird_abgelehnt_und_verbindung_bleibt() {
    let relay = relay_starten(RelayConfig::default()).await;
    let t = topic(7);
    let mut c = TestClient::verbinden(&relay).await;

    let id = c
        .anfrage(
            "publish",
            json!({"topic": t, "message": "x", "ttl": u64::MAX}),
        )
        .await;
    let antwort = c.empfangen().await;
    assert_eq!(antwort["id"], id);
    assert_eq!(antwort["error"]["code"], -32602);
    assert_eq!(relay.state().registry.backlog().anzahl(&t).await, 0);

    // Verbindung lebt weiter und ist weiterhin registriert
    c.publish(&t, "normal").await;
    assert_eq!(relay.state().registry.backlog().anzahl(&t).await, 1);
    assert_eq!(relay.state().registry.verbindungen().await, 1);

    relay.beenden().await.unwrap();
}

#[tokio::test]
async fn verfallenes_backlog_wird_periodisch_entfernt() {
    let relay = relay_starten(RelayConfig {
        backlog_bereinigung: Duration::from_millis(50),
        ..Default::default()
    })
    .await;
    let t = topic(8);
    let mut c = TestClient::verbinden(&relay).await;

    let id = c
        .anfrage("publish", json!({"topic": t, "message": "kurz", "ttl": 0}))
        .await;
    assert_eq!(c.empfangen().await["id"], id);
    assert_eq!(relay.state().registry.backlog().anzahl(&t).await, 1);

    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(relay.state().registry.backlog().anzahl(&t).await, 0);

    relay.beenden().await.unwrap();
}
