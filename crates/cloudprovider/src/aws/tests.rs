//! AWS plugin tests against the in-memory EC2 mock.

use super::AwsCloud;
use crate::cloudresource::{
    CloudResource, CloudResourceId, CloudResourceType, CloudRule, EgressRule, IngressRule, Rule,
};
use crate::error::CloudError;
use crate::provider::{CloudInterface, CloudProviderType};
use crate::secret::memory::MemorySecretReader;
use crate::types::NamespacedName;
use aws_client::{MockEc2Client, MockEc2ClientFactory};
use aws_sdk_ec2::types::{
    GroupIdentifier, Instance, InstanceNetworkInterface, InstancePrivateIpAddress, InstanceState,
    InstanceStateName, NetworkInterface, SecurityGroup, Tag, Vpc,
};
use crds::{
    CloudEntitySelector, CloudEntitySelectorSpec, CloudProviderAccount,
    CloudProviderAccountAwsConfig, CloudProviderAccountSpec, EntityMatch, SecretReference,
    VirtualMachineSelector,
};
use kube::core::ObjectMeta;
use std::sync::Arc;

const TEST_NAMESPACE: &str = "namespace01";
const TEST_ACCOUNT: &str = "account01";
const TEST_POLICY: &str = "test-anp-ns/test-anp";

fn account_key() -> NamespacedName {
    NamespacedName::new(TEST_NAMESPACE, TEST_ACCOUNT)
}

fn test_account() -> CloudProviderAccount {
    CloudProviderAccount {
        metadata: ObjectMeta {
            name: Some(TEST_ACCOUNT.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: CloudProviderAccountSpec {
            poll_interval_in_seconds: Some(1),
            aws_config: Some(CloudProviderAccountAwsConfig {
                region: "us-east-1".to_string(),
                endpoint: None,
                secret_ref: SecretReference {
                    name: "secret01".to_string(),
                    namespace: TEST_NAMESPACE.to_string(),
                    key: "credentials".to_string(),
                },
            }),
            azure_config: None,
        },
        status: None,
    }
}

fn selector_matching_vpc(name: &str, vpc_id: &str) -> CloudEntitySelector {
    CloudEntitySelector {
        metadata: ObjectMeta {
            name: Some(name.to_string()),
            namespace: Some(TEST_NAMESPACE.to_string()),
            ..Default::default()
        },
        spec: CloudEntitySelectorSpec {
            account_name: TEST_ACCOUNT.to_string(),
            account_namespace: Some(TEST_NAMESPACE.to_string()),
            vm_selector: vec![VirtualMachineSelector {
                vpc_match: Some(EntityMatch {
                    match_id: Some(vpc_id.to_string()),
                    ..Default::default()
                }),
                vm_match: vec![],
            }],
        },
        status: None,
    }
}

fn selector_matching_instance(name: &str, instance_id: &str) -> CloudEntitySelector {
    let mut selector = selector_matching_vpc(name, "unused");
    selector.spec.vm_selector = vec![VirtualMachineSelector {
        vpc_match: None,
        vm_match: vec![EntityMatch {
            match_id: Some(instance_id.to_string()),
            ..Default::default()
        }],
    }];
    selector
}

fn running_instance(id: &str, vpc_id: &str, nic_id: &str, private_ip: &str) -> Instance {
    Instance::builder()
        .instance_id(id)
        .vpc_id(vpc_id)
        .state(
            InstanceState::builder()
                .name(InstanceStateName::Running)
                .build(),
        )
        .tags(Tag::builder().key("Name").value(format!("vm-{id}")).build())
        .network_interfaces(
            InstanceNetworkInterface::builder()
                .network_interface_id(nic_id)
                .private_ip_addresses(
                    InstancePrivateIpAddress::builder()
                        .private_ip_address(private_ip)
                        .build(),
                )
                .build(),
        )
        .build()
}

fn vpc(id: &str, name: &str) -> Vpc {
    Vpc::builder()
        .vpc_id(id)
        .cidr_block("10.0.0.0/16")
        .tags(Tag::builder().key("Name").value(name).build())
        .build()
}

fn nic(id: &str, vpc_id: &str, group_ids: &[(&str, &str)]) -> NetworkInterface {
    let mut builder = NetworkInterface::builder()
        .network_interface_id(id)
        .vpc_id(vpc_id);
    for (group_id, group_name) in group_ids {
        builder = builder.groups(
            GroupIdentifier::builder()
                .group_id(*group_id)
                .group_name(*group_name)
                .build(),
        );
    }
    builder.build()
}

fn web_group(vpc_id: &str) -> CloudResource {
    CloudResource {
        resource_type: CloudResourceType::VirtualMachine,
        id: CloudResourceId::new("Web", vpc_id),
        account_id: account_key().to_string(),
        cloud_provider: CloudProviderType::Aws,
    }
}

fn vm_member(instance_id: &str, vpc_id: &str) -> CloudResource {
    CloudResource {
        resource_type: CloudResourceType::VirtualMachine,
        id: CloudResourceId::new(instance_id, vpc_id),
        account_id: account_key().to_string(),
        cloud_provider: CloudProviderType::Aws,
    }
}

fn ingress_cidr_rule(port: u16, cidr: &str, policy: &str) -> CloudRule {
    CloudRule::new(
        Rule::Ingress(IngressRule {
            from_port: Some(port),
            from_src_ip: vec![cidr.parse().unwrap()],
            from_security_groups: vec![],
            protocol: Some(6),
        }),
        policy,
        "nephe-at-web",
    )
}

async fn setup() -> (AwsCloud, MockEc2Client) {
    let secrets = MemorySecretReader::new();
    secrets.insert(
        TEST_NAMESPACE,
        "secret01",
        "credentials",
        br#"{"accessKeyId": "keyId", "accessKeySecret": "keySecret"}"#,
    );
    let mock = MockEc2Client::new();
    let cloud = AwsCloud::new(Arc::new(MockEc2ClientFactory::new(mock.clone())));
    cloud
        .add_provider_account(&secrets, &test_account())
        .await
        .unwrap();
    (cloud, mock)
}

#[tokio::test]
async fn inventory_poll_surfaces_the_union_of_selectors() {
    let (cloud, mock) = setup().await;
    let key = account_key();
    mock.add_vpc(vpc("vpc-01", "prod"));
    mock.add_vpc(vpc("vpc-02", "dev"));
    mock.add_instance(running_instance("i-1", "vpc-01", "eni-1", "10.0.0.5"));
    mock.add_instance(running_instance("i-2", "vpc-02", "eni-2", "10.1.0.5"));

    cloud
        .add_account_resource_selector(&key, &selector_matching_vpc("selector01", "vpc-01"))
        .await
        .unwrap();
    cloud.do_inventory_poll(&key).await.unwrap();

    let vms = cloud.instances_given_provider_account(&key).await.unwrap();
    assert_eq!(vms.len(), 1);
    let vm = &vms["i-1"];
    assert_eq!(vm.vpc_id, "vpc-01");
    assert_eq!(vm.network_interfaces[0].private_ips, vec!["10.0.0.5"]);
    assert_eq!(vm.labels["nephe.io/cpa-name"], TEST_ACCOUNT);
    assert_eq!(vm.labels["nephe.io/vpc-name"], "prod");

    let vpcs = cloud.get_vpc_inventory(&key).await.unwrap();
    assert!(vpcs["vpc-01"].managed);
    assert!(!vpcs["vpc-02"].managed);

    // A second selector widens the surfaced set to the union of both.
    cloud
        .add_account_resource_selector(&key, &selector_matching_instance("selector02", "i-2"))
        .await
        .unwrap();
    cloud.do_inventory_poll(&key).await.unwrap();
    let vms = cloud.instances_given_provider_account(&key).await.unwrap();
    assert_eq!(vms.len(), 2);

    // Removing one selector never affects the other.
    cloud
        .remove_account_resource_selector(
            &key,
            &NamespacedName::new(TEST_NAMESPACE, "selector02"),
        )
        .await;
    cloud.do_inventory_poll(&key).await.unwrap();
    let vms = cloud.instances_given_provider_account(&key).await.unwrap();
    assert_eq!(vms.len(), 1);
    assert!(vms.contains_key("i-1"));
}

#[tokio::test]
async fn poll_without_selectors_skips_vm_fetch_but_snapshots_vpcs() {
    let (cloud, mock) = setup().await;
    let key = account_key();
    mock.add_vpc(vpc("vpc-01", "prod"));
    mock.add_instance(running_instance("i-1", "vpc-01", "eni-1", "10.0.0.5"));

    cloud.do_inventory_poll(&key).await.unwrap();
    assert!(cloud
        .instances_given_provider_account(&key)
        .await
        .unwrap()
        .is_empty());
    assert_eq!(cloud.get_vpc_inventory(&key).await.unwrap().len(), 1);
}

#[tokio::test]
async fn reset_inventory_cache_clears_snapshot_and_stats() {
    let (cloud, mock) = setup().await;
    let key = account_key();
    mock.add_vpc(vpc("vpc-01", "prod"));
    cloud.do_inventory_poll(&key).await.unwrap();
    assert!(!cloud.get_vpc_inventory(&key).await.unwrap().is_empty());

    cloud.reset_inventory_cache(&key).await.unwrap();
    assert!(cloud.get_vpc_inventory(&key).await.unwrap().is_empty());
    let status = cloud.get_account_status(&key).await.unwrap();
    assert!(status.poll_status.unwrap().last_poll_time.is_none());
}

#[tokio::test]
async fn create_security_group_is_idempotent_and_requires_snapshot_vpc() {
    let (cloud, mock) = setup().await;
    let key = account_key();
    mock.add_vpc(vpc("vpc-01", "prod"));
    cloud.do_inventory_poll(&key).await.unwrap();

    let group = web_group("vpc-01");
    let id_first = cloud.create_security_group(&group, false).await.unwrap();
    let id_second = cloud.create_security_group(&group, false).await.unwrap();
    assert_eq!(id_first, id_second);
    let created = mock.security_group(&id_first).unwrap();
    assert_eq!(created.group_name(), Some("nephe-at-web"));

    // Membership-only groups get the address-group prefix.
    let ag_id = cloud.create_security_group(&group, true).await.unwrap();
    assert_eq!(
        mock.security_group(&ag_id).unwrap().group_name(),
        Some("nephe-ag-web")
    );

    // A VPC absent from the snapshot is rejected before any cloud call.
    let missing = web_group("vpc-99");
    let err = cloud.create_security_group(&missing, false).await.unwrap_err();
    assert!(matches!(err, CloudError::VpcNotInSnapshot { .. }));
}

#[tokio::test]
async fn membership_update_attaches_and_falls_back_to_default_on_detach() {
    let (cloud, mock) = setup().await;
    let key = account_key();
    mock.add_vpc(vpc("vpc-01", "prod"));
    mock.add_instance(running_instance("i-1", "vpc-01", "eni-1", "10.0.0.5"));
    mock.add_security_group(
        SecurityGroup::builder()
            .group_id("sg-default")
            .group_name("default")
            .vpc_id("vpc-01")
            .build(),
    );
    mock.add_network_interface(nic("eni-1", "vpc-01", &[("sg-default", "default")]));

    cloud
        .add_account_resource_selector(&key, &selector_matching_vpc("selector01", "vpc-01"))
        .await
        .unwrap();
    cloud.do_inventory_poll(&key).await.unwrap();

    let group = web_group("vpc-01");
    let group_id = cloud.create_security_group(&group, false).await.unwrap();

    cloud
        .update_security_group_members(&group, &[vm_member("i-1", "vpc-01")], false)
        .await
        .unwrap();
    let (_, groups) = mock.modified_interface_groups().pop().unwrap();
    assert!(groups.contains(&group_id));
    assert!(groups.contains(&"sg-default".to_string()));

    // Emptying the membership detaches the NIC; the default group remains
    // so the workload is never stranded.
    cloud
        .update_security_group_members(&group, &[], false)
        .await
        .unwrap();
    let (_, groups) = mock.modified_interface_groups().pop().unwrap();
    assert_eq!(groups, vec!["sg-default".to_string()]);
}

#[tokio::test]
async fn rule_update_diffs_against_cloud_state_and_preserves_unowned_rules() {
    let (cloud, mock) = setup().await;
    let key = account_key();
    mock.add_vpc(vpc("vpc-01", "prod"));
    cloud.do_inventory_poll(&key).await.unwrap();

    let group = web_group("vpc-01");
    let group_id = cloud.create_security_group(&group, false).await.unwrap();
    let peer_id = cloud.create_security_group(&group, true).await.unwrap();

    // A rule the controller does not own must survive every update.
    let foreign = aws_sdk_ec2::types::IpPermission::builder()
        .ip_protocol("tcp")
        .from_port(8080)
        .to_port(8080)
        .ip_ranges(
            aws_sdk_ec2::types::IpRange::builder()
                .cidr_ip("172.16.0.0/12")
                .build(),
        )
        .build();
    aws_client::Ec2ApiClient::authorize_security_group_ingress(&mock, &group_id, vec![foreign])
        .await
        .unwrap();

    let rules = vec![
        ingress_cidr_rule(22, "192.168.1.0/24", TEST_POLICY),
        CloudRule::new(
            Rule::Ingress(IngressRule {
                from_port: Some(22),
                from_src_ip: vec![],
                from_security_groups: vec![CloudResourceId::new("Web", "vpc-01")],
                protocol: Some(6),
            }),
            TEST_POLICY,
            "nephe-at-web",
        ),
        CloudRule::new(
            Rule::Egress(EgressRule {
                to_port: Some(443),
                to_dst_ip: vec!["10.0.0.0/8".parse().unwrap()],
                to_security_groups: vec![],
                protocol: Some(6),
            }),
            TEST_POLICY,
            "nephe-at-web",
        ),
    ];
    cloud
        .update_security_group_rules(&group, &[], &[], &rules)
        .await
        .unwrap();

    let stored = mock.security_group(&group_id).unwrap();
    // 1 foreign + 2 owned ingress permissions.
    assert_eq!(stored.ip_permissions().len(), 3);
    assert_eq!(stored.ip_permissions_egress().len(), 1);
    assert!(stored.ip_permissions().iter().any(|p| p
        .user_id_group_pairs()
        .iter()
        .any(|pair| pair.group_id() == Some(peer_id.as_str()))));

    // Replaying the same rule set is a no-op.
    let authorize_calls = mock.authorized_ingress().len();
    cloud
        .update_security_group_rules(&group, &[], &[], &rules)
        .await
        .unwrap();
    assert_eq!(mock.authorized_ingress().len(), authorize_calls);
    assert!(mock.revoked_ingress().is_empty());

    // Dropping a rule revokes exactly the stale permission; the foreign
    // rule is untouched.
    cloud
        .update_security_group_rules(&group, &[], &[], &rules[1..])
        .await
        .unwrap();
    let stored = mock.security_group(&group_id).unwrap();
    assert_eq!(stored.ip_permissions().len(), 2);
    assert!(stored
        .ip_permissions()
        .iter()
        .any(|p| p.ip_ranges().iter().any(|r| r.cidr_ip() == Some("172.16.0.0/12"))));
}

#[tokio::test]
async fn rules_without_policy_identity_are_rejected() {
    let (cloud, mock) = setup().await;
    let key = account_key();
    mock.add_vpc(vpc("vpc-01", "prod"));
    cloud.do_inventory_poll(&key).await.unwrap();
    let group = web_group("vpc-01");
    cloud.create_security_group(&group, false).await.unwrap();

    let rules = vec![ingress_cidr_rule(22, "192.168.1.0/24", "")];
    let err = cloud
        .update_security_group_rules(&group, &[], &[], &rules)
        .await
        .unwrap_err();
    assert!(matches!(err, CloudError::RuleMissingDescription { .. }));
}

#[tokio::test]
async fn delete_security_group_detaches_leftover_members_and_tolerates_absence() {
    let (cloud, mock) = setup().await;
    let key = account_key();
    mock.add_vpc(vpc("vpc-01", "prod"));
    mock.add_security_group(
        SecurityGroup::builder()
            .group_id("sg-default")
            .group_name("default")
            .vpc_id("vpc-01")
            .build(),
    );
    cloud.do_inventory_poll(&key).await.unwrap();

    let group = web_group("vpc-01");
    let group_id = cloud.create_security_group(&group, false).await.unwrap();
    mock.add_network_interface(nic("eni-1", "vpc-01", &[(group_id.as_str(), "nephe-at-web")]));

    cloud.delete_security_group(&group, false).await.unwrap();
    assert!(mock.security_group(&group_id).is_none());
    let (_, groups) = mock.modified_interface_groups().pop().unwrap();
    assert_eq!(groups, vec!["sg-default".to_string()]);

    // Deleting again is success.
    cloud.delete_security_group(&group, false).await.unwrap();
}

#[tokio::test]
async fn enforced_security_reports_only_controller_owned_groups() {
    let (cloud, mock) = setup().await;
    let key = account_key();
    mock.add_vpc(vpc("vpc-01", "prod"));
    mock.add_instance(running_instance("i-1", "vpc-01", "eni-1", "10.0.0.5"));
    mock.add_security_group(
        SecurityGroup::builder()
            .group_id("sg-default")
            .group_name("default")
            .vpc_id("vpc-01")
            .build(),
    );
    cloud
        .add_account_resource_selector(&key, &selector_matching_vpc("selector01", "vpc-01"))
        .await
        .unwrap();
    cloud.do_inventory_poll(&key).await.unwrap();

    let group = web_group("vpc-01");
    let group_id = cloud.create_security_group(&group, false).await.unwrap();
    mock.add_network_interface(nic(
        "eni-1",
        "vpc-01",
        &[(group_id.as_str(), "nephe-at-web"), ("sg-default", "default")],
    ));
    let rules = vec![ingress_cidr_rule(22, "192.168.1.0/24", TEST_POLICY)];
    cloud
        .update_security_group_rules(&group, &[], &[], &rules)
        .await
        .unwrap();

    let contents = cloud.get_enforced_security().await;
    assert_eq!(contents.len(), 1);
    let content = &contents[0];
    assert_eq!(content.resource.id.name, "web");
    assert!(!content.membership_only);
    assert_eq!(content.ingress_rules.len(), 1);
    assert_eq!(content.ingress_rules[0].np_namespaced_name, TEST_POLICY);
    assert_eq!(content.members_with_other_sg_attached.len(), 1);
}
