//!  seedlink is a real-time seismic data server.  Acquisition plugins
//! run as child processes and send it samples, Mini-SEED records and
//! log messages through a pipe.  The server packs what it receives
//! into fixed size Mini-SEED records, keeps each station's recent
//! records in memory and on disk, and streams them to clients that
//! speak the SeedLink protocol over TCP.
//!
//! Every record a station commits gets a 24 bit sequence number.  A
//! client that reconnects with the last sequence it saw continues
//! exactly where it left off, as long as the record is still in the
//! station's memory ring or in one of its disk segments.
//!
//! ##  Running the server:
//!
//!   The server is configured by a TOML file (see the *config*
//! module) and takes the following options:
//!
//! *   --config-file - The configuration file.  Defaults to
//! /etc/seedlink/seedlink.toml.
//! *   --log-file   - The file in which the server makes its logs.
//! Without it the log goes to stderr.
//! *   -v / --verbosity - More detail in the log.  Once for
//! informational messages, twice for debugging, three times for
//! tracing.
//!
//! SIGINT and SIGTERM shut the server down in order, SIGHUP restarts
//! the plugins.
//!
//! ## SeedLink Protocol
//!
//! Clients send ASCII command lines terminated by CR, LF or both.
//! Responses are `OK\r\n` or `ERROR\r\n` unless noted.  A connection
//! starts in uni-station mode, talking to the server's first station.
//!
//! ### HELLO
//!
//! Replies with two lines: the software version and the
//! organization running the server.
//!
//! ### STATION station [network]
//!
//! Switches the connection to multi-station mode and adds a station
//! to the request.  The following SELECT, TIME, DATA and FETCH apply
//! to that station.  Fails if the station is unknown or the client
//! is not allowed to see it.
//!
//! ### SELECT [pattern]
//!
//! Limits the streams sent to those matching `[!]LLCCC.T`: location,
//! channel and packet type with `?` wildcards.  A leading `!` makes
//! it an exclusion.  Without a pattern the selectors are cleared.
//!
//! ### DATA [sequence [begin time]] / FETCH [...]
//!
//! Starts sending with record `sequence` (hexadecimal), or with the
//! next new record when none is given.  With a begin time, records
//! before it are skipped.  DATA continues with new records in real
//! time; FETCH stops with `END` once the client has caught up.
//!
//! ### TIME begin [end]
//!
//! Sends the records of a time window, followed by `END`.  Times are
//! `year,month,day,hour,minute,second`.  Only available to clients
//! that have the window-extraction privilege.
//!
//! ### END
//!
//! Ends the list of stations in multi-station mode and starts the
//! data flow.
//!
//! ### BYE
//!
//! Closes the connection.
//!
//! ### CAT
//!
//! The list of stations, as ASCII Mini-SEED records.
//!
//! ### INFO level
//!
//! An XML document describing the server at `level`: id,
//! capabilities, stations, streams, gaps, connections or all.  It
//! arrives as ASCII Mini-SEED records of channel `INF`, or `ERR` if
//! the level is not allowed to the client.
//!
//! ### BATCH
//!
//! Suppresses the `OK`/`ERROR` acknowledgements of the commands
//! that follow.
//!
//! ### Data frames
//!
//! Each record is sent as `SL`, six hexadecimal digits of sequence
//! number and the record itself.
//!
pub mod acl;
pub mod acquisition;
pub mod backfill;
pub mod buffers;
pub mod config;
pub mod connection;
pub mod lockfile;
pub mod monitor;
pub mod mseed;
pub mod plugin;
pub mod sequence;
pub mod server;
pub mod signals;
pub mod station;
pub mod stationio;
pub mod timeutil;
pub mod xmldoc;
