use crate::modbus::{self, ModbusTcpCodec, Operation, Request, ResponseKind};
use crate::registers::{Catalog, KindMask, Model};
use futures::{SinkExt, StreamExt as _};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tracing::{debug, info, trace};

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("no connection to the heat pump is open")]
    NotInitialized,
    #[error("a connection to the heat pump ({model} model) is already open")]
    AlreadyOpen { model: Model },
    #[error("could not connect to `{address}` over TCP")]
    ConnectionFailed {
        address: String,
        #[source]
        source: std::io::Error,
    },
    #[error("register `{name}` of kind {kinds} not found")]
    RegisterNotFound { name: String, kinds: KindMask },
    #[error("register `{name}` is not supported by the {model} model")]
    UnsupportedForModel { name: String, model: Model },
    #[error("could not read register `{name}`")]
    ReadFailure {
        name: String,
        #[source]
        source: modbus::Error,
    },
    #[error("could not write register `{name}`")]
    WriteFailure {
        name: String,
        #[source]
        source: modbus::Error,
    },
}

/// A channel to the controller carrying one Modbus request and its response at a time.
pub trait Transport {
    /// Send out the operation and wait for the matching response.
    ///
    /// Exception responses are reported as errors.
    fn call(
        &mut self,
        operation: Operation,
    ) -> impl Future<Output = Result<ResponseKind, modbus::Error>>;

    /// Release the underlying connection.
    fn shutdown(&mut self) -> impl Future<Output = ()>;
}

/// Modbus TCP transport, by default over a [`TcpStream`].
pub struct ModbusTcp<S = TcpStream> {
    io: Framed<S, ModbusTcpCodec>,
    transaction_id_generator: u16,
}

impl ModbusTcp {
    pub async fn connect(address: &str, port: u16) -> Result<Self, std::io::Error> {
        info!(message = "connecting...", address, port);
        let addresses = tokio::net::lookup_host((address, port)).await?.collect::<Vec<_>>();
        debug!(message = "resolved", ?addresses);
        let socket = TcpStream::connect(&*addresses).await?;
        let nodelay_result = socket.set_nodelay(true);
        trace!(message = "setting nodelay", is_error = ?nodelay_result.err());
        Ok(Self::new(socket))
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> ModbusTcp<S> {
    pub fn new(stream: S) -> Self {
        Self { io: Framed::new(stream, ModbusTcpCodec {}), transaction_id_generator: 0 }
    }

    fn new_transaction_id(&mut self) -> u16 {
        let transaction_id = self.transaction_id_generator;
        self.transaction_id_generator = transaction_id.wrapping_add(1);
        transaction_id
    }
}

impl<S: AsyncRead + AsyncWrite + Unpin> Transport for ModbusTcp<S> {
    async fn call(&mut self, operation: Operation) -> Result<ResponseKind, modbus::Error> {
        let transaction_id = self.new_transaction_id();
        let request = Request { device_id: modbus::UNIT_ID, transaction_id, operation };
        self.io.send(request).await.map_err(modbus::Error::Send)?;
        loop {
            let response = match self.io.next().await {
                None => return Err(modbus::Error::Disconnected),
                Some(Err(e)) => return Err(modbus::Error::Receive(e)),
                Some(Ok(response)) => response,
            };
            if response.transaction_id != transaction_id {
                debug!(
                    message = "a response we were not expecting",
                    transaction = response.transaction_id,
                    expected = transaction_id
                );
                continue;
            }
            return response.into_result(operation.function_code());
        }
    }

    async fn shutdown(&mut self) {
        if let Err(e) = SinkExt::<Request>::close(&mut self.io).await {
            debug!(
                message = "could not shut down the connection",
                error = (&e as &dyn std::error::Error)
            );
        }
    }
}

/// An open connection to one controller of a known model.
pub struct Session<T = ModbusTcp> {
    pub(crate) transport: T,
    pub(crate) model: Model,
    pub(crate) catalog: &'static Catalog,
}

impl<T> Session<T> {
    pub fn new(transport: T, model: Model, catalog: &'static Catalog) -> Self {
        Self { transport, model, catalog }
    }

    pub fn model(&self) -> Model {
        self.model
    }

    pub fn catalog(&self) -> &'static Catalog {
        self.catalog
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }
}

/// Holds at most one open [`Session`].
///
/// Opening while a session is already held is refused, so the held transport is never leaked or
/// silently replaced. Closing is always allowed.
pub struct Connection<T = ModbusTcp> {
    session: Option<Session<T>>,
}

impl<T> Default for Connection<T> {
    fn default() -> Self {
        Self { session: None }
    }
}

impl Connection<ModbusTcp> {
    /// Connect to the controller at `address:port` using the built-in register catalog.
    pub async fn open(
        &mut self,
        address: &str,
        port: u16,
        model: Model,
    ) -> Result<&mut Session, Error> {
        if let Some(session) = &self.session {
            return Err(Error::AlreadyOpen { model: session.model });
        }
        let transport = ModbusTcp::connect(address, port).await.map_err(|source| {
            Error::ConnectionFailed { address: format!("{address}:{port}"), source }
        })?;
        info!(message = "connected", address, port, %model);
        self.attach(transport, model, Catalog::builtin())
    }
}

impl<T: Transport> Connection<T> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take ownership of an already established transport.
    pub fn attach(
        &mut self,
        transport: T,
        model: Model,
        catalog: &'static Catalog,
    ) -> Result<&mut Session<T>, Error> {
        if let Some(session) = &self.session {
            return Err(Error::AlreadyOpen { model: session.model });
        }
        Ok(self.session.insert(Session::new(transport, model, catalog)))
    }

    /// Release the connection, if any.
    pub async fn close(&mut self) {
        let Some(mut session) = self.session.take() else {
            return;
        };
        session.transport.shutdown().await;
        info!(message = "connection closed", model = %session.model);
    }

    pub fn is_open(&self) -> bool {
        self.session.is_some()
    }

    pub fn session(&mut self) -> Result<&mut Session<T>, Error> {
        self.session.as_mut().ok_or(Error::NotInitialized)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn open_twice_is_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let mut connection: Connection = Connection::new();
        connection.open("127.0.0.1", port, Model::Mega).await.unwrap();
        let (mut peer, _) = listener.accept().await.unwrap();
        let second = connection.open("127.0.0.1", port, Model::Inverter).await;
        assert!(matches!(second, Err(Error::AlreadyOpen { model: Model::Mega })));
        assert!(connection.is_open());
        assert_eq!(connection.session().unwrap().model(), Model::Mega);
        connection.close().await;
        assert!(!connection.is_open());
        // Closing shuts the stream down, so the device sees end of file.
        assert_eq!(peer.read(&mut [0u8; 1]).await.unwrap(), 0);
        connection.close().await;
        assert!(!connection.is_open());
    }

    #[tokio::test]
    async fn refused_connection_leaves_connection_closed() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);
        let mut connection: Connection = Connection::new();
        let result = connection.open("127.0.0.1", port, Model::Mega).await;
        let Err(Error::ConnectionFailed { address, .. }) = result else {
            panic!("connecting to a closed port succeeded");
        };
        assert_eq!(address, format!("127.0.0.1:{port}"));
        assert!(!connection.is_open());
        assert!(matches!(connection.session(), Err(Error::NotInitialized)));
    }

    #[tokio::test]
    async fn close_without_open_is_a_noop() {
        let mut connection: Connection = Connection::new();
        connection.close().await;
        connection.close().await;
        assert!(matches!(connection.session(), Err(Error::NotInitialized)));
    }

    #[tokio::test]
    async fn tcp_transport_round_trip() {
        let (client, mut device) = tokio::io::duplex(256);
        let device = tokio::spawn(async move {
            let mut request = [0u8; 12];
            device.read_exact(&mut request).await.unwrap();
            // A stale response to some earlier transaction comes first.
            device.write_all(&[0x55, 0x55, 0, 0, 0, 5, 1, 0x03, 2, 0, 1]).await.unwrap();
            let [t0, t1, ..] = request;
            device.write_all(&[t0, t1, 0, 0, 0, 5, 1, 0x03, 2, 0, 225]).await.unwrap();
            request
        });
        let mut transport = ModbusTcp::new(client);
        let response = transport.call(Operation::ReadHoldings { address: 100, count: 1 }).await;
        assert_eq!(response.unwrap(), ResponseKind::Words { values: vec![225] });
        let request = device.await.unwrap();
        assert_eq!(request, [0, 0, 0, 0, 0, 6, 1, 0x03, 0, 100, 0, 1]);
    }

    #[tokio::test]
    async fn tcp_transport_reports_exceptions_and_disconnects() {
        let (client, mut device) = tokio::io::duplex(256);
        let device = tokio::spawn(async move {
            let mut request = [0u8; 12];
            device.read_exact(&mut request).await.unwrap();
            let [t0, t1, ..] = request;
            device.write_all(&[t0, t1, 0, 0, 0, 3, 1, 0x86, 0x02]).await.unwrap();
            device.read_exact(&mut request).await.unwrap();
        });
        let mut transport = ModbusTcp::new(client);
        let response = transport.call(Operation::WriteHolding { address: 9999, value: 1 }).await;
        assert!(matches!(response, Err(modbus::Error::Exception { function: 6, code: 2 })));
        let response = transport.call(Operation::ReadCoils { address: 50, count: 1 }).await;
        assert!(matches!(response, Err(modbus::Error::Disconnected)));
        device.await.unwrap();
    }

    #[tokio::test]
    async fn malformed_response_keeps_the_transport_usable() {
        let (client, mut device) = tokio::io::duplex(256);
        let device = tokio::spawn(async move {
            let mut request = [0u8; 12];
            device.read_exact(&mut request).await.unwrap();
            let [t0, t1, ..] = request;
            device.write_all(&[t0, t1, 0, 0, 0, 5, 1, 0x03, 4, 0, 225]).await.unwrap();
            device.read_exact(&mut request).await.unwrap();
            let [t0, t1, ..] = request;
            device.write_all(&[t0, t1, 0, 0, 0, 5, 1, 0x03, 2, 0, 225]).await.unwrap();
        });
        let mut transport = ModbusTcp::new(client);
        let response = transport.call(Operation::ReadHoldings { address: 100, count: 1 }).await;
        assert!(matches!(response, Err(modbus::Error::MalformedResponse(3))));
        let response = transport.call(Operation::ReadHoldings { address: 100, count: 1 }).await;
        assert_eq!(response.unwrap(), ResponseKind::Words { values: vec![225] });
        device.await.unwrap();
    }
}
