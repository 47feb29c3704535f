mod logger;
mod mptcp;
mod scenarios;
mod tcp;
mod util;
