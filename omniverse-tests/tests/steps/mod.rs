mod negotiation_steps;
mod packet_steps;
mod registry_steps;
mod session_steps;
