mod common;
mod test_dispatcher;
mod test_engine;
mod test_fsm;
